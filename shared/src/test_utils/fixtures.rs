use chrono::{DateTime, Utc};

use crate::models::{DeliveryAttempt, Invitation, ParentRef};
use crate::store::{DeliveryLog, InvitationStore};

pub fn parent(n: usize) -> ParentRef {
    ParentRef::new(format!("parent-{}", n), format!("parent{}@example.com", n))
}

/// Creates an invitation through the store's normal creation path.
pub async fn seed_invitation<S>(store: &S, parent: &ParentRef, child_email: &str) -> Invitation
where
    S: InvitationStore + ?Sized,
{
    store
        .create_invitation(parent, child_email, None)
        .await
        .expect("failed to seed invitation")
}

/// Records an attempt for `invitation` at an explicit time.
pub async fn seed_attempt<L>(
    log: &L,
    invitation: &Invitation,
    success: bool,
    sent_at: DateTime<Utc>,
) -> DeliveryAttempt
where
    L: DeliveryLog + ?Sized,
{
    let attempt = if success {
        DeliveryAttempt::succeeded(&invitation.id, &invitation.child_email, "Parent Invite", sent_at)
    } else {
        DeliveryAttempt::failed(
            &invitation.id,
            &invitation.child_email,
            "Parent Invite",
            sent_at,
            "simulated bounce",
        )
    };
    log.record(attempt).await.expect("failed to seed attempt")
}
