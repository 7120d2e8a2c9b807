use serde::{Deserialize, Serialize};

pub const INVITATION_CREATED: &str = "invitation_created";
pub const INVITATION_ACCEPTED: &str = "invitation_accepted";

/// Event published when an invitation changes state
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct InvitationEvent {
    pub event_type: String,
    pub invitation_id: String,
    pub parent_id: String,
    pub child_email: String,
    pub timestamp: String,
}
