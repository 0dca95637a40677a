//! Job status, results, and progress streams.

use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    response::{
        sse::{Event, KeepAlive},
        Sse,
    },
    Json,
};
use futures::Stream;
use serde::Deserialize;
use tokio_stream::StreamExt as _;
use uuid::Uuid;

use critique_core::defaults::JOB_LIST_LIMIT;
use critique_core::{CritiqueResult, EventEnvelope, Job, JobStatus};

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub limit: Option<i64>,
}

/// Most recent jobs first.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let jobs = state
        .orchestrator
        .list_jobs(query.limit.unwrap_or(JOB_LIST_LIMIT))
        .await?;
    Ok(Json(jobs))
}

/// Current job state; reads never wait on in-flight inference.
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.orchestrator.get_job(id).await?))
}

/// The structured critique of a finished job.
///
/// # Returns
/// - 200 OK with the result once `done`
/// - 409 Conflict while the job is still running
/// - 422 Unprocessable Entity with the error kind when the job failed
pub async fn get_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CritiqueResult>, ApiError> {
    let job = state.orchestrator.get_job(id).await?;
    match job.status {
        JobStatus::Done => job
            .result
            .map(Json)
            .ok_or_else(|| ApiError::Internal(format!("job {} is done without a result", id))),
        JobStatus::Error => {
            let (kind, message) = job
                .error
                .map(|e| (e.kind.to_string(), e.message))
                .unwrap_or_else(|| ("analysis_failed".into(), "job failed".into()));
            Err(ApiError::JobFailed { kind, message })
        }
        status => Err(ApiError::Conflict(format!(
            "job {} is {} ({}%)",
            id, status, job.progress_percent
        ))),
    }
}

/// Server-sent progress for one job: its current state, then live
/// transitions, closing after `done` or `error`.
///
/// ```text
/// event: job.progress
/// id: 019508a0-1234-7def-8000-abcdef123456
/// data: {"event_id":"...","event_type":"job.progress",...}
/// ```
pub async fn job_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let events = state.orchestrator.progress().subscribe(id).await?;

    let stream = events.filter_map(|event| {
        let envelope = EventEnvelope::new(event);
        serde_json::to_string(&envelope).ok().map(|json| {
            Ok(Event::default()
                .event(envelope.event_type.clone())
                .id(envelope.event_id.to_string())
                .data(json))
        })
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(state.sse_keepalive)
            .text("keepalive"),
    ))
}
