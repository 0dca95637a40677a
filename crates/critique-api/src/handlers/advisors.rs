//! Advisor catalog and reference profiles.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use critique_core::{DimensionalProfile, UpsertProfileRequest};

use crate::{ApiError, AppState};

#[derive(Debug, Serialize)]
pub struct AdvisorSummary {
    pub id: String,
    pub name: String,
    pub focus_areas: Vec<String>,
}

pub async fn list_advisors(State(state): State<AppState>) -> Json<Vec<AdvisorSummary>> {
    let advisors = state
        .orchestrator
        .advisors()
        .list()
        .map(|a| AdvisorSummary {
            id: a.id.clone(),
            name: a.name.clone(),
            focus_areas: a.focus_areas.clone(),
        })
        .collect();
    Json(advisors)
}

/// Reference profiles available for retrieval.
pub async fn list_profiles(
    State(state): State<AppState>,
    Path(advisor_id): Path<String>,
) -> Result<Json<Vec<DimensionalProfile>>, ApiError> {
    Ok(Json(state.orchestrator.list_references(&advisor_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ImportProfilesRequest {
    pub profiles: Vec<UpsertProfileRequest>,
}

#[derive(Debug, Serialize)]
pub struct ImportProfilesResponse {
    pub imported: usize,
    pub profiles: Vec<DimensionalProfile>,
}

/// Upsert reference profiles for an advisor.
///
/// The advisor comes from the path; any `advisor_id` or `working_set` in the
/// body is ignored. The batch is all-or-nothing on validation.
pub async fn import_profiles(
    State(state): State<AppState>,
    Path(advisor_id): Path<String>,
    Json(req): Json<ImportProfilesRequest>,
) -> Result<(StatusCode, Json<ImportProfilesResponse>), ApiError> {
    let profiles = state
        .orchestrator
        .import_references(&advisor_id, req.profiles)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ImportProfilesResponse {
            imported: profiles.len(),
            profiles,
        }),
    ))
}
