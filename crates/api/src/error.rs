use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use promptgate_core::error::CoreError;
use serde_json::json;

use crate::engine::EnqueueError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `promptgate-core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A database error from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The pending queue is at capacity. The job record persists and will
    /// be recovered on the next startup.
    #[error("Job queue is full")]
    QueueFull(#[from] EnqueueError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                CoreError::Unauthorized(msg) => {
                    (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
                }
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },

            AppError::Database(err) => {
                tracing::error!(error = %err, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }

            AppError::QueueFull(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "QUEUE_FULL",
                "job queue is full, try again later".to_string(),
            ),

            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),

            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
