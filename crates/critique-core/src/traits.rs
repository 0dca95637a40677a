//! Repository traits shared by the PostgreSQL and in-process stores.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    AnalysisMode, CreateJobRequest, CritiqueResult, DimensionalProfile, Job, JobError, JobStatus,
    QueueStats, UpsertProfileRequest,
};
use crate::Result;

// =============================================================================
// PROFILE STORE
// =============================================================================

/// Persistent table of dimensional profiles keyed by `(advisor_id, image_path)`.
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// Upsert a profile. Last write wins; `created_at` of an existing key is
    /// kept and `updated_at` is stamped. Durable before returning.
    async fn put(&self, req: UpsertProfileRequest) -> Result<DimensionalProfile>;

    /// Most recent profile for the key.
    async fn get(&self, advisor_id: &str, image_path: &str) -> Result<Option<DimensionalProfile>>;

    /// All retrieval candidates for an advisor, oldest first.
    ///
    /// Working-set profiles and any path in `exclude_paths` are left out.
    async fn scan(&self, advisor_id: &str, exclude_paths: &[String])
        -> Result<Vec<DimensionalProfile>>;

    /// Number of profiles `scan` would return.
    async fn count_references(&self, advisor_id: &str, exclude_paths: &[String]) -> Result<i64>;
}

// =============================================================================
// JOB STORE
// =============================================================================

/// Persistent job table. All status changes go through state-machine checks.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new `queued` job.
    async fn create(&self, req: CreateJobRequest) -> Result<Job>;

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Oldest `queued` job, if any.
    async fn next_queued(&self) -> Result<Option<Job>>;

    /// Record the resolved strategy. Only valid while `queued`.
    async fn set_effective_mode(
        &self,
        job_id: Uuid,
        mode: AnalysisMode,
        fell_back: bool,
    ) -> Result<Job>;

    /// Move to a non-terminal state. Progress never decreases.
    async fn transition(&self, job_id: Uuid, to: JobStatus, progress_percent: i32) -> Result<Job>;

    /// Move `analyzing → done` and persist the result.
    async fn complete(&self, job_id: Uuid, result: &CritiqueResult) -> Result<Job>;

    /// Move a non-terminal job to `error`.
    async fn fail(&self, job_id: Uuid, error: &JobError) -> Result<Job>;

    async fn list_recent(&self, limit: i64) -> Result<Vec<Job>>;

    async fn queue_stats(&self) -> Result<QueueStats>;

    /// Fail every job left mid-pass by a restart, with the kind of the pass
    /// it was in. Status, progress and effective mode are kept, so observers
    /// never see the job move backwards. Returns the failed jobs.
    async fn fail_interrupted(&self) -> Result<Vec<Job>>;
}
