//! Server-sent events stream for a single job.
//!
//! Terminal jobs replay one `result` event and close. Live jobs subscribe
//! BEFORE reading the current state, so a finalization racing the
//! connection still closes the stream instead of leaving the client
//! hanging. The subscription unregisters itself when the client
//! disconnects and the stream is dropped.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use futures::stream::{self, BoxStream, StreamExt};
use promptgate_core::error::CoreError;
use promptgate_db::models::Job;
use promptgate_db::repositories::JobRepo;
use promptgate_events::Subscription;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

type EventStream = BoxStream<'static, Result<Event, Infallible>>;

/// GET /api/v1/jobs/{id}/sse
pub async fn stream_job_events(
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
        return Ok(sse_response(replay_terminal(&job)?));
    }

    let subscription = state.scheduler.subscribe(&id);

    // Re-read after subscribing: a job finalized in between has already
    // closed its fan-out entry, and this subscription would never see the
    // result event.
    let job = JobRepo::find_by_id(&state.pool, &id)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "Job",
            id: id.clone(),
        })?;
    if job.status.is_terminal() {
        return Ok(sse_response(replay_terminal(&job)?));
    }

    let initial = Event::default()
        .event("status")
        .json_data(&job)
        .map_err(|e| AppError::Internal(format!("encode SSE event: {e}")))?;

    let live = stream::unfold(subscription, |mut sub: Subscription| async move {
        let event = sub.recv().await?;
        let frame = Event::default()
            .event(event.kind.as_str())
            .data(event.data.to_string());
        Some((Ok::<_, Infallible>(frame), sub))
    });

    Ok(sse_response(
        stream::iter([Ok(initial)]).chain(live).boxed(),
    ))
}

fn sse_response(stream: EventStream) -> ([(header::HeaderName, &'static str); 1], Sse<EventStream>) {
    ([(header::CACHE_CONTROL, "no-cache")], Sse::new(stream))
}

/// Single `result` event carrying the stored job, then end-of-stream.
fn replay_terminal(job: &Job) -> Result<EventStream, AppError> {
    let event = Event::default()
        .event("result")
        .json_data(job)
        .map_err(|e| AppError::Internal(format!("encode SSE event: {e}")))?;
    Ok(stream::iter([Ok(event)]).boxed())
}
