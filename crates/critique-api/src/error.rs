//! HTTP error mapping.

use axum::{http::StatusCode, response::IntoResponse, Json};
use tracing::error;

/// Error returned by handlers, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    /// The job exists but has no result yet.
    Conflict(String),
    /// The job ended in `error`; carries its persisted kind.
    JobFailed { kind: String, message: String },
    Internal(String),
}

impl From<critique_core::Error> for ApiError {
    fn from(err: critique_core::Error) -> Self {
        match err {
            critique_core::Error::Validation(msg) => ApiError::BadRequest(msg),
            critique_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            critique_core::Error::JobNotFound(id) => {
                ApiError::NotFound(format!("job {} not found", id))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, serde_json::json!({ "error": msg }))
            }
            ApiError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, serde_json::json!({ "error": msg }))
            }
            ApiError::Conflict(msg) => {
                (StatusCode::CONFLICT, serde_json::json!({ "error": msg }))
            }
            ApiError::JobFailed { kind, message } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                serde_json::json!({ "error": message, "kind": kind }),
            ),
            ApiError::Internal(msg) => {
                error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, serde_json::json!({ "error": msg }))
            }
        };
        (status, Json(body)).into_response()
    }
}
