//! Image submission.

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use critique_core::{AnalysisMode, JobStatus};
use critique_jobs::SubmitRequest;

use crate::{ApiError, AppState};

/// Response to an accepted submission.
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub mode_requested: AnalysisMode,
    /// SSE endpoint streaming this job's progress.
    pub events_url: String,
}

/// Queue an analysis.
///
/// # Multipart fields
/// - `image`: image bytes (required)
/// - `advisor`: advisor id (required)
/// - `mode`: `baseline`, `rag`, `lora` or `rag_lora` (optional, defaults to
///   the server's configured mode)
///
/// # Returns
/// - 202 Accepted with the job id and its event stream URL
/// - 400 Bad Request for a missing field, unknown advisor or mode, or a
///   payload that is not an image
pub async fn analyze(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<AnalyzeResponse>), ApiError> {
    let mut image = None;
    let mut advisor_id = None;
    let mut mode = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read image: {}", e)))?;
                image = Some(bytes.to_vec());
            }
            "advisor" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read advisor: {}", e)))?;
                advisor_id = Some(text.trim().to_string());
            }
            "mode" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read mode: {}", e)))?;
                if !text.trim().is_empty() {
                    mode = Some(text.parse::<AnalysisMode>()?);
                }
            }
            _ => {}
        }
    }

    let image = image.ok_or_else(|| ApiError::BadRequest("Missing 'image' field".into()))?;
    let advisor_id = advisor_id
        .filter(|a| !a.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing 'advisor' field".into()))?;

    let job = state
        .orchestrator
        .submit(SubmitRequest {
            advisor_id,
            mode,
            image,
        })
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(AnalyzeResponse {
            job_id: job.id,
            status: job.status,
            mode_requested: job.mode_requested,
            events_url: format!("/api/v1/jobs/{}/events", job.id),
        }),
    ))
}
