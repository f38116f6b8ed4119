//! Route definitions for the `/jobs` resource.
//!
//! All endpoints require authentication.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{jobs, sse};
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /             -> list_jobs
/// POST   /             -> create_job
/// GET    /{id}         -> get_job
/// DELETE /{id}         -> delete_job
/// POST   /{id}/cancel  -> cancel_job
/// GET    /{id}/sse     -> stream_job_events
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::create_job))
        .route("/{id}", get(jobs::get_job).delete(jobs::delete_job))
        .route("/{id}/cancel", post(jobs::cancel_job))
        .route("/{id}/sse", get(sse::stream_job_events))
}
