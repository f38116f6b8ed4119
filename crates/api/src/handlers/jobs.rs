//! Handlers for the `/jobs` resource.
//!
//! Submission persists the job before enqueueing it; a full queue is
//! reported as 503 while the record stays in the store, where the next
//! startup's recovery pass picks it up.

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use promptgate_core::error::CoreError;
use promptgate_core::pagination::{clamp_limit, clamp_offset};
use promptgate_core::status::JobStatus;
use promptgate_db::models::{CreateJobRequest, Job, JobListQuery};
use promptgate_db::repositories::JobRepo;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// POST /api/v1/jobs
///
/// Accepts a submission and responds 202 with the queued job. The body is
/// decoded manually (rather than through the `Json` extractor) so both an
/// over-limit body and malformed JSON surface as a 400.
pub async fn create_job(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> AppResult<impl IntoResponse> {
    let body = body.map_err(|_| AppError::BadRequest("request body too large".into()))?;
    let mut request: CreateJobRequest = serde_json::from_slice(&body)
        .map_err(|_| AppError::BadRequest("invalid JSON body".into()))?;

    if request.model.is_empty() {
        request.model = state.config.default_model.clone();
    }
    request.validate()?;

    let job = Job::from_request(request);
    JobRepo::create(&state.pool, &job).await?;
    state.scheduler.enqueue(&job.id)?;

    tracing::info!(job_id = %job.id, model = %job.model, "job accepted");
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// GET /api/v1/jobs
///
/// Paginated listing, newest first. An empty page serializes as `[]`.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let limit = clamp_limit(query.limit);
    let offset = clamp_offset(query.offset);

    let (jobs, total) = JobRepo::list(&state.pool, Some(limit), Some(offset)).await?;

    Ok(Json(json!({
        "jobs": jobs,
        "total": total,
        "limit": limit,
        "offset": offset,
    })))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job = JobRepo::find_by_id(&state.pool, &id)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "Job",
            id: id.clone(),
        })?;
    Ok(Json(job))
}

/// DELETE /api/v1/jobs/{id}
///
/// Removes the record without signalling cancellation; callers wanting to
/// stop a running job cancel it first.
pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    if !JobRepo::delete(&state.pool, &id).await? {
        return Err(CoreError::NotFound {
            entity: "Job",
            id: id.clone(),
        }
        .into());
    }
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/jobs/{id}/cancel
///
/// Writes the cancelled status first; if a worker currently holds the job
/// its cancellation token fires, and if the job is still queued the worker
/// will observe the status on dequeue and skip it.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job = JobRepo::find_by_id(&state.pool, &id)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "Job",
            id: id.clone(),
        })?;

    if job.status.is_terminal() {
        return Err(CoreError::Conflict("job already in terminal state".into()).into());
    }

    JobRepo::update_status(
        &state.pool,
        &id,
        JobStatus::Cancelled,
        "",
        "job cancelled by user",
    )
    .await?;

    // Whether a running worker was interrupted does not change the answer.
    state.scheduler.cancel(&id);

    tracing::info!(job_id = %id, "job cancelled");
    Ok(Json(json!({ "status": "cancelled" })))
}
