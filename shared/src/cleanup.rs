use std::collections::HashSet;

use log::info;
use serde::Serialize;

use crate::error::StoreError;
use crate::models::normalize_email;
use crate::store::{DeliveryLog, InvitationStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    pub invitations: usize,
    pub deliveries: usize,
}

/// Deletes every invitation sent by or to one of `emails`, together with its
/// delivery attempts. Attempts go first so a partial failure never leaves
/// orphaned log rows behind.
pub async fn purge_for_emails<S, L>(
    store: &S,
    log: &L,
    emails: &[String],
) -> Result<CleanupSummary, StoreError>
where
    S: InvitationStore + ?Sized,
    L: DeliveryLog + ?Sized,
{
    let targets: HashSet<String> = emails
        .iter()
        .map(|e| normalize_email(e))
        .filter(|e| !e.is_empty())
        .collect();
    if targets.is_empty() {
        return Ok(CleanupSummary::default());
    }

    let ids: Vec<String> = store
        .list_invitations()
        .await?
        .into_iter()
        .filter(|inv| {
            targets.contains(&normalize_email(&inv.parent_email))
                || targets.contains(&normalize_email(&inv.child_email))
        })
        .map(|inv| inv.id)
        .collect();
    if ids.is_empty() {
        return Ok(CleanupSummary::default());
    }

    let deliveries = log.delete_for_invitations(&ids).await?;
    let invitations = store.delete_invitations(&ids).await?;
    info!(
        "Cleanup removed {} invitations and {} delivery attempts for {} addresses",
        invitations,
        deliveries,
        targets.len()
    );
    Ok(CleanupSummary {
        invitations,
        deliveries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParentRef;
    use crate::store::memory::{MemoryDeliveryLog, MemoryInvitationStore};
    use crate::test_utils::fixtures::{parent, seed_attempt, seed_invitation};
    use chrono::Utc;

    #[tokio::test]
    async fn test_purge_matches_parent_or_child_and_cascades() {
        let store = MemoryInvitationStore::new();
        let log = MemoryDeliveryLog::new();
        let now = Utc::now();

        let by_child = seed_invitation(&store, &parent(1), "leaving@school.org").await;
        let by_parent = seed_invitation(
            &store,
            &ParentRef::new("p-9", "Leaving.Parent@Example.com"),
            "kid@school.org",
        )
        .await;
        let kept = seed_invitation(&store, &parent(2), "stays@school.org").await;
        for inv in [&by_child, &by_parent, &kept] {
            seed_attempt(&log, inv, false, now).await;
            seed_attempt(&log, inv, true, now).await;
        }

        let summary = purge_for_emails(
            &store,
            &log,
            &[
                " LEAVING@school.org ".to_string(),
                "leaving.parent@example.com".to_string(),
            ],
        )
        .await
        .unwrap();

        assert_eq!(
            summary,
            CleanupSummary {
                invitations: 2,
                deliveries: 4
            }
        );
        assert_eq!(store.list_invitations().await.unwrap(), vec![kept.clone()]);
        assert_eq!(log.attempts_since(None).await.unwrap().len(), 2);
        assert_eq!(log.attempts_for(&kept.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_purge_with_no_matches() {
        let store = MemoryInvitationStore::new();
        let log = MemoryDeliveryLog::new();
        seed_invitation(&store, &parent(1), "kid@school.org").await;

        let summary = purge_for_emails(&store, &log, &["  ".to_string()])
            .await
            .unwrap();
        assert_eq!(summary, CleanupSummary::default());
        let summary = purge_for_emails(&store, &log, &["nobody@x.com".to_string()])
            .await
            .unwrap();
        assert_eq!(summary, CleanupSummary::default());
        assert_eq!(store.list_invitations().await.unwrap().len(), 1);
    }
}
