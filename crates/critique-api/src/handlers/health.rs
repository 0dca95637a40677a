//! Health check.

use axum::{extract::State, http::StatusCode, Json};

use critique_jobs::HealthReport;

use crate::AppState;

/// 200 when the store and the inference engine answer, 503 otherwise. The
/// body is the same either way.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.orchestrator.health().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
