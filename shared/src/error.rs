use thiserror::Error;

use crate::runner::RunSummary;

/// Errors raised by the persistence layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Conflicting write: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<serde_dynamo::Error> for StoreError {
    fn from(e: serde_dynamo::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Failures of the invitation and delivery workflows.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InviteError {
    /// Invitation creation blocked: the child is already linked to this parent.
    #[error("{child_email} is already linked to parent {parent_id}")]
    DuplicateLink {
        parent_id: String,
        child_email: String,
    },

    #[error("No invitation matches the supplied token")]
    InvalidToken,

    #[error("Invitation {0} has already been accepted")]
    AlreadyAccepted(String),

    /// Recorded as a failed delivery attempt; never aborts a run.
    #[error("Dispatch to {recipient} failed: {reason}")]
    DispatchFailure { recipient: String, reason: String },

    #[error("Failed to write delivery record: {0}")]
    StoreWriteFailure(String),

    /// A pass finished but some of its delivery records were lost.
    #[error(
        "Failed to write delivery records: {} of {} could not be written",
        .0.record_failures.len(),
        .0.processed
    )]
    IncompleteRun(RunSummary),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type InviteResult<T> = std::result::Result<T, InviteError>;

/// Errors raised while reading configuration from the environment.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(String),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}
