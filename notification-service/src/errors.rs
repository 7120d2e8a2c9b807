use parentlink_shared::error::{InviteError, StoreError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Failed to parse event payload: {0}")]
    InvalidPayload(String),

    #[error("Failed to look up invitation: {0}")]
    InvitationLookupFailed(#[from] StoreError),

    #[error("Failed to send invitation: {0}")]
    SendFailed(#[from] InviteError),
}
