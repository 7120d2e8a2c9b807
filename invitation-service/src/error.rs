use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use log::{error, warn};
use parentlink_shared::error::{InviteError, StoreError};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Error returned by every handler; rendered as `{"error": message}` plus any details.
#[derive(Error, Debug)]
#[error("{status}: {message}")]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Extra top-level fields merged into the JSON body.
    pub details: Option<Map<String, Value>>,
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn new(status: StatusCode, message: String) -> Self {
        Self {
            status,
            message,
            details: None,
        }
    }

    pub fn with_detail(mut self, key: &str, value: Value) -> Self {
        self.details
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value);
        self
    }

    pub fn bad_request(message: String) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn forbidden(message: String) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: String) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: String) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn bad_gateway(message: String) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    pub fn internal_server_error(message: String) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }
        let mut body = self.details.unwrap_or_default();
        body.insert("error".to_string(), Value::String(self.message));
        (self.status, Json(Value::Object(body))).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => AppError::not_found(format!("Not found: {}", what)),
            StoreError::Conflict(msg) => AppError::conflict(msg),
            other => AppError::internal_server_error(other.to_string()),
        }
    }
}

impl From<InviteError> for AppError {
    fn from(e: InviteError) -> Self {
        match e {
            InviteError::DuplicateLink { .. } | InviteError::AlreadyAccepted(_) => {
                AppError::conflict(e.to_string())
            }
            InviteError::InvalidToken => AppError::not_found(e.to_string()),
            InviteError::DispatchFailure { .. } => AppError::bad_gateway(e.to_string()),
            InviteError::StoreWriteFailure(_) => AppError::internal_server_error(e.to_string()),
            InviteError::IncompleteRun(ref summary) => {
                let summary = json!(summary);
                AppError::internal_server_error(e.to_string()).with_detail("summary", summary)
            }
            InviteError::Store(inner) => inner.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parentlink_shared::runner::RunSummary;

    #[test]
    fn test_invite_errors_map_to_status() {
        let cases = [
            (
                InviteError::DuplicateLink {
                    parent_id: "p".into(),
                    child_email: "c@x.com".into(),
                },
                StatusCode::CONFLICT,
            ),
            (InviteError::InvalidToken, StatusCode::NOT_FOUND),
            (InviteError::AlreadyAccepted("i".into()), StatusCode::CONFLICT),
            (
                InviteError::DispatchFailure {
                    recipient: "c@x.com".into(),
                    reason: "bounced".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                InviteError::StoreWriteFailure("down".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                InviteError::IncompleteRun(RunSummary::default()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                InviteError::Store(StoreError::NotFound("invitation x".into())),
                StatusCode::NOT_FOUND,
            ),
            (
                InviteError::Store(StoreError::Database("boom".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }
}
