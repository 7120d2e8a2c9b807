use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{InviteError, InviteResult};

pub mod events;

/// Length of an invitation token (hyphen-less v4 UUID).
pub const TOKEN_LEN: usize = 32;

/// Returns the current time formatted as RFC 3339.
pub fn now_str() -> String {
    Utc::now().to_rfc3339()
}

/// Canonical form of an email address used for matching.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Generates a fresh, unguessable invitation token.
pub fn generate_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// The parent account issuing an invitation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParentRef {
    pub id: String,
    pub email: String,
}

impl ParentRef {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
        }
    }
}

/// A token-bearing offer for a parent to link to a child account.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Invitation {
    pub id: String,
    pub token: String,
    pub parent_id: String,
    pub parent_email: String,
    pub child_email: String,
    #[serde(default)]
    pub child_name: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_accepted: bool,
    #[serde(default)]
    pub accepted_at: Option<DateTime<Utc>>,
}

impl Invitation {
    /// Builds a new, unaccepted invitation with a freshly generated token.
    pub fn new(
        parent: &ParentRef,
        child_email: &str,
        child_name: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            token: generate_token(),
            parent_id: parent.id.clone(),
            parent_email: parent.email.clone(),
            child_email: normalize_email(child_email),
            child_name: child_name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            created_at,
            is_accepted: false,
            accepted_at: None,
        }
    }

    pub fn parent(&self) -> ParentRef {
        ParentRef::new(self.parent_id.clone(), self.parent_email.clone())
    }

    /// True when this (accepted) invitation links `child_email` to `parent_id`.
    pub fn links(&self, parent_id: &str, child_email: &str) -> bool {
        self.is_accepted
            && self.parent_id == parent_id
            && self.child_email == normalize_email(child_email)
    }
}

/// One recorded outcome of trying to email an invitation.
///
/// Attempts are immutable once written. `to_email` and `subject` are copied
/// at send time so later edits to the invitation do not rewrite history.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DeliveryAttempt {
    pub id: String,
    pub invitation_id: String,
    pub to_email: String,
    pub subject: String,
    pub sent_at: DateTime<Utc>,
    pub success: bool,
    #[serde(default)]
    pub error_text: String,
}

impl DeliveryAttempt {
    pub fn succeeded(
        invitation_id: &str,
        to_email: &str,
        subject: &str,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            invitation_id: invitation_id.to_string(),
            to_email: to_email.to_string(),
            subject: subject.to_string(),
            sent_at,
            success: true,
            error_text: String::new(),
        }
    }

    pub fn failed(
        invitation_id: &str,
        to_email: &str,
        subject: &str,
        sent_at: DateTime<Utc>,
        error_text: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            invitation_id: invitation_id.to_string(),
            to_email: to_email.to_string(),
            subject: subject.to_string(),
            sent_at,
            success: false,
            error_text: error_text.into(),
        }
    }

    /// Converts a failed attempt into `InviteError::DispatchFailure`.
    pub fn ensure_delivered(&self) -> InviteResult<()> {
        if self.success {
            Ok(())
        } else {
            Err(InviteError::DispatchFailure {
                recipient: self.to_email.clone(),
                reason: self.error_text.clone(),
            })
        }
    }
}

/// Per-invitation delivery totals.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryCounts {
    pub sent: usize,
    pub failed: usize,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl DeliveryCounts {
    pub fn observe(&mut self, attempt: &DeliveryAttempt) {
        self.sent += 1;
        if !attempt.success {
            self.failed += 1;
        }
        if self.last_attempt_at.map_or(true, |t| attempt.sent_at >= t) {
            self.last_attempt_at = Some(attempt.sent_at);
        }
    }

    pub fn from_attempts<'a, I>(attempts: I) -> Self
    where
        I: IntoIterator<Item = &'a DeliveryAttempt>,
    {
        let mut counts = Self::default();
        for attempt in attempts {
            counts.observe(attempt);
        }
        counts
    }

    pub fn succeeded(&self) -> usize {
        self.sent - self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_invitation_normalizes_child() {
        let parent = ParentRef::new("parent-1", "mum@example.com");
        let inv = Invitation::new(
            &parent,
            "  Kid@School.ORG ",
            Some("  ".to_string()),
            Utc::now(),
        );

        assert_eq!(inv.child_email, "kid@school.org");
        assert!(inv.child_name.is_none());
        assert_eq!(inv.token.len(), TOKEN_LEN);
        assert!(inv.token.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!inv.is_accepted);
        assert_eq!(inv.parent(), parent);
    }

    #[test]
    fn test_tokens_are_unique() {
        let tokens: std::collections::HashSet<String> =
            (0..500).map(|_| generate_token()).collect();
        assert_eq!(tokens.len(), 500);
    }

    #[test]
    fn test_counts_track_latest_attempt() {
        let now = Utc::now();
        let attempts = vec![
            DeliveryAttempt::failed("inv", "a@b.com", "s", now - Duration::hours(2), "boom"),
            DeliveryAttempt::succeeded("inv", "a@b.com", "s", now),
            DeliveryAttempt::failed("inv", "a@b.com", "s", now - Duration::hours(1), "boom"),
        ];

        let counts = DeliveryCounts::from_attempts(&attempts);
        assert_eq!(counts.sent, 3);
        assert_eq!(counts.failed, 2);
        assert_eq!(counts.succeeded(), 1);
        assert_eq!(counts.last_attempt_at, Some(now));
    }

    #[test]
    fn test_ensure_delivered() {
        let now = Utc::now();
        let ok = DeliveryAttempt::succeeded("inv", "a@b.com", "s", now);
        assert!(ok.ensure_delivered().is_ok());

        let failed = DeliveryAttempt::failed("inv", "a@b.com", "s", now, "mailbox full");
        assert_eq!(
            failed.ensure_delivered(),
            Err(InviteError::DispatchFailure {
                recipient: "a@b.com".to_string(),
                reason: "mailbox full".to_string(),
            })
        );
    }
}
