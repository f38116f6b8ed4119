//! API-key authentication.
//!
//! Every route except the frontend (`/`) and the health endpoint requires
//! an `X-API-Key` header matching one of the configured keys. Comparison
//! is constant-time per key so a timing side channel cannot narrow down
//! key bytes.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use promptgate_core::error::CoreError;
use subtle::ConstantTimeEq;

use crate::error::AppError;
use crate::state::AppState;

/// Paths reachable without a key.
const EXEMPT_PATHS: [&str; 2] = ["/", "/api/v1/health"];

pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if EXEMPT_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if provided.is_empty() {
        return AppError::Core(CoreError::Unauthorized(
            "missing X-API-Key header".into(),
        ))
        .into_response();
    }

    let authorized = state
        .config
        .api_keys
        .iter()
        .any(|key| bool::from(provided.as_bytes().ct_eq(key.as_bytes())));
    if !authorized {
        return AppError::Core(CoreError::Unauthorized("invalid API key".into()))
            .into_response();
    }

    next.run(request).await
}
