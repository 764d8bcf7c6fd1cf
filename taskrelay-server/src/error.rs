//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors are automatically converted
//! to a JSON-body HTTP response with an appropriate status code.
//!
//! Storage and internal errors are logged with full detail but only a generic
//! message is returned to the caller.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use taskrelay_core::StoreError;
use taskrelay_core::cache::CacheKeyError;
use taskrelay_core::protocol::submit::SubmitError;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Propagated from the queue or table backend.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// The caller referenced a resource that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The request body is larger than the server accepts.
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    /// The resource exists but is not in a state that allows the request.
    #[error("conflict: {0}")]
    Conflict(String),

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            ServerError::PayloadTooLarge(m) => (StatusCode::PAYLOAD_TOO_LARGE, m.clone()),
            ServerError::Store(e) => {
                error!(error = %e, "storage error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_owned())
            }
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_owned())
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}

impl From<SubmitError> for ServerError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::InvalidRequest(m) => ServerError::BadRequest(m),
            SubmitError::Enqueue(e) => ServerError::Store(e),
            other @ SubmitError::Encode(_) => ServerError::Internal(other.to_string()),
        }
    }
}

impl From<CacheKeyError> for ServerError {
    fn from(e: CacheKeyError) -> Self {
        ServerError::BadRequest(e.to_string())
    }
}
