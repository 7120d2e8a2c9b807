use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use tokio::sync::RwLock;

use super::{DeliveryLog, InvitationStore};
use crate::error::{InviteError, InviteResult, StoreError};
use crate::models::{DeliveryAttempt, DeliveryCounts, Invitation};

#[derive(Default)]
struct InvitationTable {
    by_id: HashMap<String, Invitation>,
    id_by_token: HashMap<String, String>,
}

/// In-process invitation store.
#[derive(Default)]
pub struct MemoryInvitationStore {
    table: RwLock<InvitationTable>,
}

impl MemoryInvitationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvitationStore for MemoryInvitationStore {
    async fn insert_invitation(&self, invitation: Invitation) -> Result<Invitation, StoreError> {
        let mut table = self.table.write().await;
        if table.by_id.contains_key(&invitation.id) {
            return Err(StoreError::Conflict(format!(
                "invitation id {} already exists",
                invitation.id
            )));
        }
        if table.id_by_token.contains_key(&invitation.token) {
            return Err(StoreError::Conflict("invitation token already in use".into()));
        }
        table
            .id_by_token
            .insert(invitation.token.clone(), invitation.id.clone());
        table.by_id.insert(invitation.id.clone(), invitation.clone());
        Ok(invitation)
    }

    async fn accept(&self, token: &str) -> InviteResult<Invitation> {
        let mut table = self.table.write().await;
        let id = table
            .id_by_token
            .get(token)
            .cloned()
            .ok_or(InviteError::InvalidToken)?;
        let invitation = table
            .by_id
            .get_mut(&id)
            .ok_or(InviteError::InvalidToken)?;

        if invitation.is_accepted {
            return Err(InviteError::AlreadyAccepted(invitation.id.clone()));
        }

        invitation.is_accepted = true;
        invitation.accepted_at = Some(Utc::now());
        Ok(invitation.clone())
    }

    async fn get_invitation(&self, id: &str) -> Result<Invitation, StoreError> {
        let table = self.table.read().await;
        table
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("invitation {}", id)))
    }

    async fn get_invitation_by_token(&self, token: &str) -> Result<Invitation, StoreError> {
        let table = self.table.read().await;
        table
            .id_by_token
            .get(token)
            .and_then(|id| table.by_id.get(id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound("invitation for token".into()))
    }

    async fn get_invitations_by_parent(
        &self,
        parent_id: &str,
    ) -> Result<Vec<Invitation>, StoreError> {
        let table = self.table.read().await;
        let mut found: Vec<Invitation> = table
            .by_id
            .values()
            .filter(|inv| inv.parent_id == parent_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn list_invitations(&self) -> Result<Vec<Invitation>, StoreError> {
        let table = self.table.read().await;
        let mut all: Vec<Invitation> = table.by_id.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }

    async fn delete_invitations(&self, ids: &[String]) -> Result<usize, StoreError> {
        let mut table = self.table.write().await;
        let mut removed = 0;
        for id in ids {
            if let Some(inv) = table.by_id.remove(id) {
                table.id_by_token.remove(&inv.token);
                removed += 1;
            }
        }
        debug!("Deleted {} invitations from memory store", removed);
        Ok(removed)
    }
}

/// Attempts in insertion order plus a per-invitation index into them.
#[derive(Default)]
struct AttemptArena {
    attempts: Vec<DeliveryAttempt>,
    by_invitation: HashMap<String, Vec<usize>>,
}

impl AttemptArena {
    fn reindex(&mut self) {
        self.by_invitation.clear();
        for (pos, attempt) in self.attempts.iter().enumerate() {
            self.by_invitation
                .entry(attempt.invitation_id.clone())
                .or_default()
                .push(pos);
        }
    }
}

/// In-process delivery log.
#[derive(Default)]
pub struct MemoryDeliveryLog {
    arena: RwLock<AttemptArena>,
}

impl MemoryDeliveryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.arena.read().await.attempts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DeliveryLog for MemoryDeliveryLog {
    async fn record(&self, attempt: DeliveryAttempt) -> Result<DeliveryAttempt, StoreError> {
        let mut arena = self.arena.write().await;
        let pos = arena.attempts.len();
        arena
            .by_invitation
            .entry(attempt.invitation_id.clone())
            .or_default()
            .push(pos);
        arena.attempts.push(attempt.clone());
        Ok(attempt)
    }

    async fn attempts_for(&self, invitation_id: &str) -> Result<Vec<DeliveryAttempt>, StoreError> {
        let arena = self.arena.read().await;
        let Some(positions) = arena.by_invitation.get(invitation_id) else {
            return Ok(Vec::new());
        };

        // Newest first; equal timestamps fall back to write order.
        let mut ordered: Vec<usize> = positions.clone();
        ordered.sort_by(|a, b| {
            arena.attempts[*b]
                .sent_at
                .cmp(&arena.attempts[*a].sent_at)
                .then_with(|| b.cmp(a))
        });
        Ok(ordered
            .into_iter()
            .map(|pos| arena.attempts[pos].clone())
            .collect())
    }

    async fn attempts_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<DeliveryAttempt>, StoreError> {
        let arena = self.arena.read().await;
        Ok(arena
            .attempts
            .iter()
            .filter(|a| since.map_or(true, |s| a.sent_at >= s))
            .cloned()
            .collect())
    }

    async fn delete_for_invitations(&self, invitation_ids: &[String]) -> Result<usize, StoreError> {
        let doomed: HashSet<&str> = invitation_ids.iter().map(String::as_str).collect();
        let mut arena = self.arena.write().await;
        let before = arena.attempts.len();
        arena
            .attempts
            .retain(|a| !doomed.contains(a.invitation_id.as_str()));
        let removed = before - arena.attempts.len();
        arena.reindex();
        Ok(removed)
    }

    async fn counts_for_many(
        &self,
        invitation_ids: &[String],
    ) -> Result<HashMap<String, DeliveryCounts>, StoreError> {
        let arena = self.arena.read().await;
        let mut counts = HashMap::with_capacity(invitation_ids.len());
        for id in invitation_ids {
            let mut c = DeliveryCounts::default();
            if let Some(positions) = arena.by_invitation.get(id) {
                for pos in positions {
                    c.observe(&arena.attempts[*pos]);
                }
            }
            counts.insert(id.clone(), c);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParentRef;
    use chrono::Duration;

    fn parent() -> ParentRef {
        ParentRef::new("parent-1", "parent@example.com")
    }

    #[tokio::test]
    async fn test_create_and_accept() {
        let store = MemoryInvitationStore::new();
        let inv = store
            .create_invitation(&parent(), "child@x.com", Some("Kid".into()))
            .await
            .unwrap();

        let accepted = store.accept(&inv.token).await.unwrap();
        assert!(accepted.is_accepted);
        assert!(accepted.accepted_at.is_some());

        // Second accept is observable and does not change state
        let again = store.accept(&inv.token).await;
        assert_eq!(again, Err(InviteError::AlreadyAccepted(inv.id.clone())));
        let stored = store.get_invitation(&inv.id).await.unwrap();
        assert!(stored.is_accepted);
        assert_eq!(stored.accepted_at, accepted.accepted_at);
    }

    #[tokio::test]
    async fn test_accept_unknown_token() {
        let store = MemoryInvitationStore::new();
        assert_eq!(store.accept("nope").await, Err(InviteError::InvalidToken));
    }

    #[tokio::test]
    async fn test_duplicate_link_blocks_creation() {
        let store = MemoryInvitationStore::new();
        let inv = store
            .create_invitation(&parent(), "child@x.com", None)
            .await
            .unwrap();

        // A pending invitation does not block a second one
        let second = store
            .create_invitation(&parent(), "child@x.com", None)
            .await
            .unwrap();
        assert_ne!(second.token, inv.token);

        store.accept(&inv.token).await.unwrap();
        let err = store
            .create_invitation(&parent(), "CHILD@x.com", None)
            .await
            .unwrap_err();
        assert!(matches!(err, InviteError::DuplicateLink { .. }));

        // Other parents are unaffected
        let other = ParentRef::new("parent-2", "dad@example.com");
        assert!(store.create_invitation(&other, "child@x.com", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_insert_rejects_token_reuse() {
        let store = MemoryInvitationStore::new();
        let inv = Invitation::new(&parent(), "child@x.com", None, Utc::now());
        store.insert_invitation(inv.clone()).await.unwrap();

        let mut clash = Invitation::new(&parent(), "other@x.com", None, Utc::now());
        clash.token = inv.token.clone();
        assert!(matches!(
            store.insert_invitation(clash).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_most_recent_prefers_latest_write_on_ties() {
        let log = MemoryDeliveryLog::new();
        let now = Utc::now();
        log.record(DeliveryAttempt::failed("inv", "a@b.com", "first", now, "x"))
            .await
            .unwrap();
        log.record(DeliveryAttempt::succeeded("inv", "a@b.com", "second", now))
            .await
            .unwrap();
        log.record(DeliveryAttempt::failed(
            "inv",
            "a@b.com",
            "older",
            now - Duration::minutes(5),
            "x",
        ))
        .await
        .unwrap();

        let latest = log.most_recent("inv").await.unwrap().unwrap();
        assert_eq!(latest.subject, "second");

        let counts = log.counts_for("inv").await.unwrap();
        assert_eq!(counts.sent, 3);
        assert_eq!(counts.failed, 2);
        assert!(log.most_recent("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cascade_delete_rebuilds_index() {
        let log = MemoryDeliveryLog::new();
        let now = Utc::now();
        for inv in ["a", "b", "a", "c"] {
            log.record(DeliveryAttempt::succeeded(inv, "x@y.com", "s", now))
                .await
                .unwrap();
        }

        let removed = log.delete_for_invitations(&["a".to_string()]).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(log.len().await, 2);
        assert!(log.attempts_for("a").await.unwrap().is_empty());
        assert_eq!(log.attempts_for("c").await.unwrap().len(), 1);

        let counts = log
            .counts_for_many(&["b".to_string(), "c".to_string(), "a".to_string()])
            .await
            .unwrap();
        assert_eq!(counts["b"].sent, 1);
        assert_eq!(counts["a"].sent, 0);
    }

    #[tokio::test]
    async fn test_attempts_since_is_inclusive() {
        let log = MemoryDeliveryLog::new();
        let now = Utc::now();
        let cutoff = now - Duration::days(1);
        log.record(DeliveryAttempt::succeeded("a", "x@y.com", "s", cutoff))
            .await
            .unwrap();
        log.record(DeliveryAttempt::succeeded(
            "a",
            "x@y.com",
            "s",
            cutoff - Duration::seconds(1),
        ))
        .await
        .unwrap();

        assert_eq!(log.attempts_since(Some(cutoff)).await.unwrap().len(), 1);
        assert_eq!(log.attempts_since(None).await.unwrap().len(), 2);
    }
}
