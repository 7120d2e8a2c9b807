use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::error::{InviteError, InviteResult, StoreError};
use crate::models::{DeliveryAttempt, DeliveryCounts, Invitation, ParentRef};

pub mod dynamo;
pub mod memory;

/// Attempts made to find an unused token before giving up.
const TOKEN_RETRIES: usize = 3;

/// Storage for invitation records, keyed by their unique token.
#[async_trait]
pub trait InvitationStore: Send + Sync {
    /// Persists a fully-formed invitation. Fails with `StoreError::Conflict`
    /// when the id or token is already taken.
    async fn insert_invitation(&self, invitation: Invitation) -> Result<Invitation, StoreError>;

    /// Marks the invitation as accepted. Acceptance is monotonic: a second
    /// call reports `AlreadyAccepted` and leaves the record untouched.
    async fn accept(&self, token: &str) -> InviteResult<Invitation>;

    async fn get_invitation(&self, id: &str) -> Result<Invitation, StoreError>;

    async fn get_invitation_by_token(&self, token: &str) -> Result<Invitation, StoreError>;

    async fn get_invitations_by_parent(&self, parent_id: &str)
        -> Result<Vec<Invitation>, StoreError>;

    async fn list_invitations(&self) -> Result<Vec<Invitation>, StoreError>;

    /// Removes the given invitations, returning how many existed.
    async fn delete_invitations(&self, ids: &[String]) -> Result<usize, StoreError>;

    async fn pending_invitations(&self) -> Result<Vec<Invitation>, StoreError> {
        let all = self.list_invitations().await?;
        Ok(all.into_iter().filter(|inv| !inv.is_accepted).collect())
    }

    /// Creates an invitation for a child not yet linked to `parent`.
    async fn create_invitation(
        &self,
        parent: &ParentRef,
        child_email: &str,
        child_name: Option<String>,
    ) -> InviteResult<Invitation> {
        let existing = self.get_invitations_by_parent(&parent.id).await?;
        if existing.iter().any(|inv| inv.links(&parent.id, child_email)) {
            return Err(InviteError::DuplicateLink {
                parent_id: parent.id.clone(),
                child_email: child_email.trim().to_lowercase(),
            });
        }

        let mut last_conflict = None;
        for _ in 0..TOKEN_RETRIES {
            let invitation = Invitation::new(parent, child_email, child_name.clone(), Utc::now());
            match self.insert_invitation(invitation).await {
                Ok(created) => {
                    debug!(
                        "Created invitation id={} for parent={} child={}",
                        created.id, created.parent_id, created.child_email
                    );
                    return Ok(created);
                }
                Err(StoreError::Conflict(msg)) => {
                    warn!("Token collision while creating invitation: {}", msg);
                    last_conflict = Some(msg);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::Conflict(
            last_conflict.unwrap_or_else(|| "could not allocate a unique token".to_string()),
        )
        .into())
    }
}

/// Append-only record of every dispatch attempt, indexed by invitation id.
#[async_trait]
pub trait DeliveryLog: Send + Sync {
    async fn record(&self, attempt: DeliveryAttempt) -> Result<DeliveryAttempt, StoreError>;

    /// Attempts for one invitation, most recent first.
    async fn attempts_for(&self, invitation_id: &str) -> Result<Vec<DeliveryAttempt>, StoreError>;

    /// Every attempt sent at or after `since` (all attempts when `None`).
    async fn attempts_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<DeliveryAttempt>, StoreError>;

    /// Cascade delete for removed invitations. Returns the number of rows removed.
    async fn delete_for_invitations(&self, invitation_ids: &[String]) -> Result<usize, StoreError>;

    async fn most_recent(&self, invitation_id: &str) -> Result<Option<DeliveryAttempt>, StoreError> {
        Ok(self.attempts_for(invitation_id).await?.into_iter().next())
    }

    async fn counts_for(&self, invitation_id: &str) -> Result<DeliveryCounts, StoreError> {
        let attempts = self.attempts_for(invitation_id).await?;
        Ok(DeliveryCounts::from_attempts(&attempts))
    }

    async fn counts_for_many(
        &self,
        invitation_ids: &[String],
    ) -> Result<HashMap<String, DeliveryCounts>, StoreError> {
        let mut counts = HashMap::with_capacity(invitation_ids.len());
        for id in invitation_ids {
            counts.insert(id.clone(), self.counts_for(id).await?);
        }
        Ok(counts)
    }
}
