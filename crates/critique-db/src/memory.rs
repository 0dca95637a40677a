//! In-process stores.
//!
//! Same contracts as the PostgreSQL repositories, without durability. Used
//! by tests and by deployments that run without `DATABASE_URL`.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use uuid::Uuid;

use critique_core::{
    new_v7, AnalysisMode, CreateJobRequest, CritiqueResult, DimensionalProfile, Error, Job,
    JobError, JobRepository, JobStatus, ProfileRepository, QueueStats, Result,
    UpsertProfileRequest,
};

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| Error::Internal("in-memory store lock poisoned".into()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| Error::Internal("in-memory store lock poisoned".into()))
}

// =============================================================================
// PROFILES
// =============================================================================

/// Profile store kept in insertion order, so a scan is already in creation order.
#[derive(Default)]
pub struct MemoryProfileRepository {
    rows: RwLock<Vec<DimensionalProfile>>,
}

impl MemoryProfileRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored profiles, working set included.
    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_candidate(p: &DimensionalProfile, advisor_id: &str, exclude_paths: &[String]) -> bool {
    p.advisor_id == advisor_id && !p.working_set && !exclude_paths.contains(&p.image_path)
}

#[async_trait]
impl ProfileRepository for MemoryProfileRepository {
    async fn put(&self, req: UpsertProfileRequest) -> Result<DimensionalProfile> {
        req.validate()?;
        let grade = req.effective_grade();
        let mut rows = write(&self.rows)?;
        let now = Utc::now();

        let existing = rows
            .iter_mut()
            .find(|p| p.advisor_id == req.advisor_id && p.image_path == req.image_path);

        let profile = match existing {
            Some(row) => {
                // Writes are serialized by the lock, so the arriving write is
                // the latest; keep stamps non-decreasing under clock skew.
                row.scores = req.scores;
                row.comments = req.comments;
                row.metadata = req.metadata;
                row.overall_grade = grade;
                row.working_set = req.working_set;
                row.updated_at = now.max(row.updated_at);
                row.clone()
            }
            None => {
                let profile = DimensionalProfile {
                    id: new_v7(),
                    advisor_id: req.advisor_id,
                    image_path: req.image_path,
                    scores: req.scores,
                    comments: req.comments,
                    metadata: req.metadata,
                    overall_grade: grade,
                    working_set: req.working_set,
                    created_at: now,
                    updated_at: now,
                };
                rows.push(profile.clone());
                profile
            }
        };
        Ok(profile)
    }

    async fn get(&self, advisor_id: &str, image_path: &str) -> Result<Option<DimensionalProfile>> {
        let rows = read(&self.rows)?;
        Ok(rows
            .iter()
            .find(|p| p.advisor_id == advisor_id && p.image_path == image_path)
            .cloned())
    }

    async fn scan(
        &self,
        advisor_id: &str,
        exclude_paths: &[String],
    ) -> Result<Vec<DimensionalProfile>> {
        let rows = read(&self.rows)?;
        Ok(rows
            .iter()
            .filter(|p| is_candidate(p, advisor_id, exclude_paths))
            .cloned()
            .collect())
    }

    async fn count_references(&self, advisor_id: &str, exclude_paths: &[String]) -> Result<i64> {
        let rows = read(&self.rows)?;
        Ok(rows
            .iter()
            .filter(|p| is_candidate(p, advisor_id, exclude_paths))
            .count() as i64)
    }
}

// =============================================================================
// JOBS
// =============================================================================

/// Job store holding jobs in submission order.
pub struct MemoryJobRepository {
    jobs: RwLock<Vec<Job>>,
    notify: Arc<Notify>,
}

impl Default for MemoryJobRepository {
    fn default() -> Self {
        Self {
            jobs: RwLock::new(Vec::new()),
            notify: Arc::new(Notify::new()),
        }
    }
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notification handle for event-driven waking.
    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Apply `f` to the job after checking the state machine allows `to`.
    fn update<F>(&self, job_id: Uuid, to: JobStatus, f: F) -> Result<Job>
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = write(&self.jobs)?;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or(Error::JobNotFound(job_id))?;
        if !job.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: job.status,
                to,
            });
        }
        job.status = to;
        f(job);
        job.updated_at = Utc::now().max(job.updated_at);
        Ok(job.clone())
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn create(&self, req: CreateJobRequest) -> Result<Job> {
        let now = Utc::now();
        let job = Job {
            id: new_v7(),
            advisor_id: req.advisor_id,
            image_path: req.image_path,
            mode_requested: req.mode_requested,
            mode_effective: None,
            fell_back: false,
            status: JobStatus::Queued,
            progress_percent: 0,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        write(&self.jobs)?.push(job.clone());
        self.notify.notify_one();
        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(read(&self.jobs)?.iter().find(|j| j.id == job_id).cloned())
    }

    async fn next_queued(&self) -> Result<Option<Job>> {
        Ok(read(&self.jobs)?
            .iter()
            .find(|j| j.status == JobStatus::Queued)
            .cloned())
    }

    async fn set_effective_mode(
        &self,
        job_id: Uuid,
        mode: AnalysisMode,
        fell_back: bool,
    ) -> Result<Job> {
        let mut jobs = write(&self.jobs)?;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or(Error::JobNotFound(job_id))?;
        if job.status != JobStatus::Queued {
            return Err(Error::InvalidTransition {
                from: job.status,
                to: JobStatus::Queued,
            });
        }
        job.mode_effective = Some(mode);
        job.fell_back = fell_back;
        job.updated_at = Utc::now().max(job.updated_at);
        Ok(job.clone())
    }

    async fn transition(&self, job_id: Uuid, to: JobStatus, progress_percent: i32) -> Result<Job> {
        if to.is_terminal() {
            return Err(Error::Internal(format!(
                "terminal state {} must be entered through complete/fail",
                to
            )));
        }
        self.update(job_id, to, |job| {
            job.progress_percent = job.progress_percent.max(progress_percent.min(100));
        })
    }

    async fn complete(&self, job_id: Uuid, result: &CritiqueResult) -> Result<Job> {
        let result = result.clone();
        self.update(job_id, JobStatus::Done, move |job| {
            job.progress_percent = 100;
            job.result = Some(result);
        })
    }

    async fn fail(&self, job_id: Uuid, error: &JobError) -> Result<Job> {
        let error = error.clone();
        self.update(job_id, JobStatus::Error, move |job| {
            job.error = Some(error);
        })
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<Job>> {
        let jobs = read(&self.jobs)?;
        Ok(jobs
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let jobs = read(&self.jobs)?;
        let mut stats = QueueStats::default();
        for job in jobs.iter() {
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Done => stats.done += 1,
                JobStatus::Error => stats.error += 1,
                _ => stats.in_flight += 1,
            }
            stats.total += 1;
        }
        Ok(stats)
    }

    async fn fail_interrupted(&self) -> Result<Vec<Job>> {
        let mut jobs = write(&self.jobs)?;
        let now = Utc::now();
        let mut failed = Vec::new();
        for job in jobs.iter_mut() {
            if let Some(kind) = job.status.stage_kind() {
                job.status = JobStatus::Error;
                job.error = Some(JobError::interrupted(kind));
                job.updated_at = now.max(job.updated_at);
                failed.push(job.clone());
            }
        }
        Ok(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use critique_core::{Dimension, DimensionScores, ErrorKind, ProfileMetadata};

    fn profile_req(advisor: &str, path: &str, score: f64) -> UpsertProfileRequest {
        UpsertProfileRequest {
            advisor_id: advisor.into(),
            image_path: path.into(),
            scores: DimensionScores::uniform(score),
            ..Default::default()
        }
    }

    fn job_req() -> CreateJobRequest {
        CreateJobRequest {
            advisor_id: "ansel_adams".into(),
            image_path: "/uploads/a.jpg".into(),
            mode_requested: AnalysisMode::Rag,
        }
    }

    fn result() -> CritiqueResult {
        CritiqueResult {
            advisor_id: "ansel_adams".into(),
            mode: AnalysisMode::Baseline,
            summary: "Strong tonal range.".into(),
            overall_grade: Some("B".into()),
            dimensions: vec![],
            query_scores: DimensionScores::uniform(8.0),
            references: vec![],
            html: None,
        }
    }

    #[tokio::test]
    async fn test_put_then_get_returns_latest() {
        let repo = MemoryProfileRepository::new();
        let first = repo.put(profile_req("a", "/ref/1.jpg", 5.0)).await.unwrap();
        let second = repo.put(profile_req("a", "/ref/1.jpg", 7.0)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at >= first.updated_at);

        let got = repo.get("a", "/ref/1.jpg").await.unwrap().unwrap();
        assert_eq!(got.scores.get(Dimension::Lighting), Some(7.0));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_put_derives_grade_when_missing() {
        let repo = MemoryProfileRepository::new();
        let p = repo.put(profile_req("a", "/ref/1.jpg", 8.5)).await.unwrap();
        assert_eq!(p.overall_grade.as_deref(), Some("B"));

        let mut req = profile_req("a", "/ref/2.jpg", 8.5);
        req.overall_grade = Some("A+".into());
        let p = repo.put(req).await.unwrap();
        assert_eq!(p.overall_grade.as_deref(), Some("A+"));
    }

    #[tokio::test]
    async fn test_put_rejects_out_of_range_scores() {
        let repo = MemoryProfileRepository::new();
        let err = repo.put(profile_req("a", "/ref/1.jpg", 11.0)).await;
        assert!(matches!(err, Err(Error::Validation(_))));
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let repo = MemoryProfileRepository::new();
        assert!(repo.get("a", "/nope.jpg").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_excludes_working_set_and_paths() {
        let repo = MemoryProfileRepository::new();
        repo.put(profile_req("a", "/ref/1.jpg", 5.0)).await.unwrap();
        repo.put(profile_req("a", "/ref/2.jpg", 5.0)).await.unwrap();
        repo.put(profile_req("b", "/ref/3.jpg", 5.0)).await.unwrap();
        let mut upload = profile_req("a", "/uploads/q.jpg", 5.0);
        upload.working_set = true;
        repo.put(upload).await.unwrap();

        let scanned = repo.scan("a", &["/ref/2.jpg".to_string()]).await.unwrap();
        let paths: Vec<_> = scanned.iter().map(|p| p.image_path.as_str()).collect();
        assert_eq!(paths, vec!["/ref/1.jpg"]);

        assert_eq!(repo.count_references("a", &[]).await.unwrap(), 2);
        assert_eq!(repo.count_references("c", &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_scan_keeps_creation_order_after_rewrite() {
        let repo = MemoryProfileRepository::new();
        repo.put(profile_req("a", "/ref/1.jpg", 5.0)).await.unwrap();
        repo.put(profile_req("a", "/ref/2.jpg", 5.0)).await.unwrap();
        repo.put(profile_req("a", "/ref/1.jpg", 6.0)).await.unwrap();

        let scanned = repo.scan("a", &[]).await.unwrap();
        assert_eq!(scanned[0].image_path, "/ref/1.jpg");
        assert_eq!(scanned[1].image_path, "/ref/2.jpg");
    }

    #[tokio::test]
    async fn test_rewrite_can_move_profile_into_working_set() {
        let repo = MemoryProfileRepository::new();
        repo.put(profile_req("a", "/ref/1.jpg", 5.0)).await.unwrap();
        let mut req = profile_req("a", "/ref/1.jpg", 5.0);
        req.working_set = true;
        req.metadata = ProfileMetadata::default().with_tags(["Zone System"]);
        repo.put(req).await.unwrap();

        assert!(repo.scan("a", &[]).await.unwrap().is_empty());
        let got = repo.get("a", "/ref/1.jpg").await.unwrap().unwrap();
        assert!(got.metadata.technique_tags.contains("zone_system"));
    }

    #[tokio::test]
    async fn test_job_happy_path_transitions() {
        let repo = MemoryJobRepository::new();
        let job = repo.create(job_req()).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress_percent, 0);

        repo.set_effective_mode(job.id, AnalysisMode::Baseline, true)
            .await
            .unwrap();
        repo.transition(job.id, JobStatus::Extracting, 10).await.unwrap();
        repo.transition(job.id, JobStatus::Analyzing, 60).await.unwrap();
        let done = repo.complete(job.id, &result()).await.unwrap();

        assert_eq!(done.status, JobStatus::Done);
        assert_eq!(done.progress_percent, 100);
        assert_eq!(done.mode_effective, Some(AnalysisMode::Baseline));
        assert!(done.fell_back);
        assert!(done.result.is_some());
    }

    #[tokio::test]
    async fn test_job_rejects_invalid_transitions() {
        let repo = MemoryJobRepository::new();
        let job = repo.create(job_req()).await.unwrap();

        let err = repo
            .transition(job.id, JobStatus::Analyzing, 60)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: JobStatus::Queued,
                to: JobStatus::Analyzing
            }
        ));

        assert!(repo.complete(job.id, &result()).await.is_err());
        assert!(repo
            .transition(Uuid::nil(), JobStatus::Extracting, 10)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_terminal_job_is_immutable() {
        let repo = MemoryJobRepository::new();
        let job = repo.create(job_req()).await.unwrap();
        repo.transition(job.id, JobStatus::Extracting, 10).await.unwrap();
        let failed = repo
            .fail(
                job.id,
                &JobError::new(ErrorKind::ExtractionFailed, "no JSON in output"),
            )
            .await
            .unwrap();
        assert_eq!(failed.status, JobStatus::Error);
        assert_eq!(failed.progress_percent, 10);

        assert!(repo
            .fail(job.id, &JobError::new(ErrorKind::AnalysisFailed, "again"))
            .await
            .is_err());
        assert!(repo
            .transition(job.id, JobStatus::Analyzing, 60)
            .await
            .is_err());
        assert!(repo
            .set_effective_mode(job.id, AnalysisMode::Rag, false)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_progress_never_decreases() {
        let repo = MemoryJobRepository::new();
        let job = repo.create(job_req()).await.unwrap();
        repo.transition(job.id, JobStatus::Extracting, 30).await.unwrap();
        let job = repo.transition(job.id, JobStatus::Retrieving, 20).await.unwrap();
        assert_eq!(job.progress_percent, 30);
    }

    #[tokio::test]
    async fn test_next_queued_is_fifo() {
        let repo = MemoryJobRepository::new();
        let first = repo.create(job_req()).await.unwrap();
        let second = repo.create(job_req()).await.unwrap();

        assert_eq!(repo.next_queued().await.unwrap().unwrap().id, first.id);
        repo.transition(first.id, JobStatus::Extracting, 10).await.unwrap();
        assert_eq!(repo.next_queued().await.unwrap().unwrap().id, second.id);

        let recent = repo.list_recent(10).await.unwrap();
        assert_eq!(recent[0].id, second.id);
    }

    #[tokio::test]
    async fn test_queue_stats_and_fail_interrupted() {
        let repo = MemoryJobRepository::new();
        let a = repo.create(job_req()).await.unwrap();
        repo.create(job_req()).await.unwrap();
        repo.transition(a.id, JobStatus::Extracting, 10).await.unwrap();

        let stats = repo.queue_stats().await.unwrap();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.in_flight, 1);
        assert_eq!(stats.total, 2);

        let failed = repo.fail_interrupted().await.unwrap();
        assert_eq!(failed.len(), 1);
        let a = repo.get(a.id).await.unwrap().unwrap();
        assert_eq!(a.status, JobStatus::Error);
        assert_eq!(a.progress_percent, 10);
        assert_eq!(a.error.unwrap().kind, ErrorKind::ExtractionFailed);

        let stats = repo.queue_stats().await.unwrap();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.error, 1);
    }

    #[tokio::test]
    async fn test_effective_mode_is_fixed_once_running() {
        let repo = MemoryJobRepository::new();
        let job = repo.create(job_req()).await.unwrap();
        repo.set_effective_mode(job.id, AnalysisMode::Rag, false)
            .await
            .unwrap();
        repo.transition(job.id, JobStatus::Extracting, 10).await.unwrap();

        let err = repo
            .set_effective_mode(job.id, AnalysisMode::Baseline, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        let job = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.mode_effective, Some(AnalysisMode::Rag));
    }
}
