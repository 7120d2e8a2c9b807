use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::DeliveryAttempt;
use crate::store::memory::MemoryDeliveryLog;
use crate::store::DeliveryLog;

/// Delivery log whose writes fail for selected recipients.
pub struct FailingDeliveryLog {
    inner: MemoryDeliveryLog,
    failing_recipients: HashSet<String>,
}

impl FailingDeliveryLog {
    pub fn failing_for(recipients: &[&str]) -> Self {
        Self {
            inner: MemoryDeliveryLog::new(),
            failing_recipients: recipients.iter().map(|r| r.to_string()).collect(),
        }
    }

    pub fn inner(&self) -> &MemoryDeliveryLog {
        &self.inner
    }
}

#[async_trait]
impl DeliveryLog for FailingDeliveryLog {
    async fn record(&self, attempt: DeliveryAttempt) -> Result<DeliveryAttempt, StoreError> {
        if self.failing_recipients.contains(&attempt.to_email) {
            return Err(StoreError::Database("simulated write failure".into()));
        }
        self.inner.record(attempt).await
    }

    async fn attempts_for(&self, invitation_id: &str) -> Result<Vec<DeliveryAttempt>, StoreError> {
        self.inner.attempts_for(invitation_id).await
    }

    async fn attempts_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<DeliveryAttempt>, StoreError> {
        self.inner.attempts_since(since).await
    }

    async fn delete_for_invitations(&self, invitation_ids: &[String]) -> Result<usize, StoreError> {
        self.inner.delete_for_invitations(invitation_ids).await
    }
}
