//! Crate-wide error type.
//!
//! Every fallible path returns [`ChatResult`], and HTTP handlers rely on
//! the [`IntoResponse`] impl to turn a [`ChatError`] into a JSON body with
//! the right status code. Database errors are logged in full but only a
//! generic message goes back to the client.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Malformed input; the caller must fix the request, never retried.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The device is not a member of the room it addressed.
    #[error("device is not a member of this room")]
    Authorization,

    /// A referenced message id does not resolve. Callers holding a stale
    /// anchor fall back to an unanchored history fetch.
    #[error("not found: {0}")]
    NotFound(String),

    /// The message log failed to durably append. Retry the whole send.
    #[error("persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Live fan-out failed after the message was durably recorded.
    /// Never surfaced to the sender; callers log it and move on, since the
    /// message is recoverable through catch-up.
    #[error("relay unavailable: {0}")]
    RelayUnavailable(String),
}

impl ChatError {
    fn status(&self) -> StatusCode {
        match self {
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::Authorization => StatusCode::FORBIDDEN,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Persistence(_) | ChatError::RelayUnavailable(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ChatError::Persistence(e) => {
                error!(error = %e, "message log failure");
                "storage error".to_owned()
            }
            ChatError::RelayUnavailable(e) => {
                // Should never reach a handler boundary; the gateway
                // absorbs relay failures past the commit point.
                error!(error = %e, "relay failure leaked to a handler");
                "internal error".to_owned()
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
