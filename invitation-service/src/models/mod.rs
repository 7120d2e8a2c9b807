use chrono::{DateTime, Utc};
use parentlink_shared::models::{DeliveryAttempt, DeliveryCounts, Invitation};
use serde::{Deserialize, Serialize};

// Request DTOs
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvitationRequest {
    pub child_email: String,
    #[serde(default)]
    pub child_name: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BulkResendRequest {
    pub policy: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub invitation_ids: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Default)]
pub struct AnalyticsQuery {
    pub days: Option<u32>,
}

#[derive(Deserialize, Debug)]
pub struct CleanupRequest {
    pub emails: Vec<String>,
}

// Response DTOs

/// Invitation as shown to its parent. The token is never echoed back.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvitationResponse {
    pub id: String,
    pub child_email: String,
    pub child_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_accepted: bool,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl From<Invitation> for InvitationResponse {
    fn from(inv: Invitation) -> Self {
        Self {
            id: inv.id,
            child_email: inv.child_email,
            child_name: inv.child_name,
            created_at: inv.created_at,
            is_accepted: inv.is_accepted,
            accepted_at: inv.accepted_at,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttemptResponse {
    pub sent_at: DateTime<Utc>,
    pub subject: String,
    pub success: bool,
    pub error_text: String,
}

impl From<DeliveryAttempt> for AttemptResponse {
    fn from(attempt: DeliveryAttempt) -> Self {
        Self {
            sent_at: attempt.sent_at,
            subject: attempt.subject,
            success: attempt.success,
            error_text: attempt.error_text,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvitationSummary {
    #[serde(flatten)]
    pub invitation: InvitationResponse,
    pub deliveries: DeliveryCounts,
    pub last_attempt: Option<AttemptResponse>,
}
