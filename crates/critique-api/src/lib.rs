//! # critique-api
//!
//! HTTP surface for the critique pipeline: image submission, job status and
//! results, per-job SSE progress, advisor reference profiles, and health.

pub mod error;
pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use critique_core::defaults::{MAX_BODY_SIZE_BYTES, SSE_KEEPALIVE_SECS};
use critique_jobs::Orchestrator;

pub use error::ApiError;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Interval between SSE keep-alive comments.
    pub sse_keepalive: Duration,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            sse_keepalive: Duration::from_secs(SSE_KEEPALIVE_SECS),
        }
    }
}

/// All routes. Tracing, CORS and request ids are layered on in `main`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/api/v1/analyze", post(handlers::analyze::analyze))
        .route("/api/v1/jobs", get(handlers::jobs::list_jobs))
        .route("/api/v1/jobs/:id", get(handlers::jobs::get_job))
        .route("/api/v1/jobs/:id/result", get(handlers::jobs::get_result))
        .route("/api/v1/jobs/:id/events", get(handlers::jobs::job_events))
        .route("/api/v1/advisors", get(handlers::advisors::list_advisors))
        .route(
            "/api/v1/advisors/:id/profiles",
            get(handlers::advisors::list_profiles).post(handlers::advisors::import_profiles),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE_BYTES))
        .with_state(state)
}
