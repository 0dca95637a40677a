//! Job repository implementation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

use critique_core::{
    new_v7, AnalysisMode, CreateJobRequest, CritiqueResult, Error, ErrorKind, Job, JobError,
    JobRepository, JobStatus, QueueStats, Result,
};

const JOB_COLUMNS: &str = "id, advisor_id, image_path, mode_requested, mode_effective, \
     fell_back, status, progress_percent, result, error_kind, error_message, \
     created_at, updated_at";

/// PostgreSQL implementation of JobRepository.
pub struct PgJobRepository {
    pool: Pool<Postgres>,
    /// Woken on every insert so the worker does not wait out its poll interval.
    notify: Arc<Notify>,
}

impl PgJobRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Notification handle for event-driven waking.
    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    fn parse_mode(raw: &str) -> Result<AnalysisMode> {
        raw.parse::<AnalysisMode>()
            .map_err(|_| Error::Internal(format!("unknown stored mode '{}'", raw)))
    }

    fn parse_job_row(row: sqlx::postgres::PgRow) -> Result<Job> {
        let status_raw: String = row.get("status");
        let status = JobStatus::parse(&status_raw)
            .ok_or_else(|| Error::Internal(format!("unknown stored status '{}'", status_raw)))?;

        let mode_effective = row
            .get::<Option<String>, _>("mode_effective")
            .map(|m| Self::parse_mode(&m))
            .transpose()?;

        let result = row
            .get::<Option<serde_json::Value>, _>("result")
            .map(serde_json::from_value::<CritiqueResult>)
            .transpose()?;

        let error = match row.get::<Option<String>, _>("error_kind") {
            Some(kind) => Some(JobError {
                kind: ErrorKind::parse(&kind)
                    .ok_or_else(|| Error::Internal(format!("unknown error kind '{}'", kind)))?,
                message: row
                    .get::<Option<String>, _>("error_message")
                    .unwrap_or_default(),
            }),
            None => None,
        };

        Ok(Job {
            id: row.get("id"),
            advisor_id: row.get("advisor_id"),
            image_path: row.get("image_path"),
            mode_requested: Self::parse_mode(row.get("mode_requested"))?,
            mode_effective,
            fell_back: row.get("fell_back"),
            status,
            progress_percent: row.get("progress_percent"),
            result,
            error,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    /// Explain why a guarded update touched no row.
    async fn rejected(&self, job_id: Uuid, to: JobStatus) -> Error {
        match self.get(job_id).await {
            Ok(Some(job)) => Error::InvalidTransition {
                from: job.status,
                to,
            },
            Ok(None) => Error::JobNotFound(job_id),
            Err(e) => e,
        }
    }

    fn predecessors(to: JobStatus) -> Vec<String> {
        JobStatus::allowed_predecessors(to)
            .into_iter()
            .map(|s| s.as_str().to_string())
            .collect()
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn create(&self, req: CreateJobRequest) -> Result<Job> {
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO analysis_job (id, advisor_id, image_path, mode_requested, status, \
                                       progress_percent, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, 'queued', 0, $5, $5) \
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(new_v7())
            .bind(&req.advisor_id)
            .bind(&req.image_path)
            .bind(req.mode_requested.as_str())
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;

        let job = Self::parse_job_row(row)?;
        self.notify.notify_one();
        info!(
            subsystem = "database",
            component = "jobs",
            op = "create",
            job_id = %job.id,
            advisor_id = %job.advisor_id,
            mode_requested = %job.mode_requested,
            "Job queued"
        );
        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM analysis_job WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        row.map(Self::parse_job_row).transpose()
    }

    async fn next_queued(&self) -> Result<Option<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM analysis_job \
             WHERE status = 'queued' \
             ORDER BY created_at ASC, id ASC \
             LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        row.map(Self::parse_job_row).transpose()
    }

    async fn set_effective_mode(
        &self,
        job_id: Uuid,
        mode: AnalysisMode,
        fell_back: bool,
    ) -> Result<Job> {
        let sql = format!(
            "UPDATE analysis_job \
             SET mode_effective = $2, fell_back = $3, updated_at = $4 \
             WHERE id = $1 AND status = 'queued' \
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(job_id)
            .bind(mode.as_str())
            .bind(fell_back)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        match row {
            Some(row) => Self::parse_job_row(row),
            None => Err(self.rejected(job_id, JobStatus::Queued).await),
        }
    }

    async fn transition(&self, job_id: Uuid, to: JobStatus, progress_percent: i32) -> Result<Job> {
        if to.is_terminal() {
            return Err(Error::Internal(format!(
                "terminal state {} must be entered through complete/fail",
                to
            )));
        }

        let sql = format!(
            "UPDATE analysis_job \
             SET status = $2, \
                 progress_percent = GREATEST(progress_percent, LEAST($3, 100)), \
                 updated_at = $4 \
             WHERE id = $1 AND status = ANY($5) \
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(job_id)
            .bind(to.as_str())
            .bind(progress_percent)
            .bind(Utc::now())
            .bind(Self::predecessors(to))
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        match row {
            Some(row) => {
                debug!(
                    subsystem = "database",
                    component = "jobs",
                    op = "transition",
                    job_id = %job_id,
                    status = %to,
                    "Job status updated"
                );
                Self::parse_job_row(row)
            }
            None => Err(self.rejected(job_id, to).await),
        }
    }

    async fn complete(&self, job_id: Uuid, result: &CritiqueResult) -> Result<Job> {
        let sql = format!(
            "UPDATE analysis_job \
             SET status = 'done', progress_percent = 100, result = $2, updated_at = $3 \
             WHERE id = $1 AND status = ANY($4) \
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(job_id)
            .bind(serde_json::to_value(result)?)
            .bind(Utc::now())
            .bind(Self::predecessors(JobStatus::Done))
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        match row {
            Some(row) => Self::parse_job_row(row),
            None => Err(self.rejected(job_id, JobStatus::Done).await),
        }
    }

    async fn fail(&self, job_id: Uuid, error: &JobError) -> Result<Job> {
        let sql = format!(
            "UPDATE analysis_job \
             SET status = 'error', error_kind = $2, error_message = $3, updated_at = $4 \
             WHERE id = $1 AND status = ANY($5) \
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(job_id)
            .bind(error.kind.as_str())
            .bind(&error.message)
            .bind(Utc::now())
            .bind(Self::predecessors(JobStatus::Error))
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        match row {
            Some(row) => Self::parse_job_row(row),
            None => Err(self.rejected(job_id, JobStatus::Error).await),
        }
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM analysis_job \
             ORDER BY created_at DESC, id DESC \
             LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        rows.into_iter().map(Self::parse_job_row).collect()
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM analysis_job GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            match JobStatus::parse(&status) {
                Some(JobStatus::Queued) => stats.queued += n,
                Some(JobStatus::Done) => stats.done += n,
                Some(JobStatus::Error) => stats.error += n,
                Some(_) => stats.in_flight += n,
                None => {}
            }
            stats.total += n;
        }
        Ok(stats)
    }

    async fn fail_interrupted(&self) -> Result<Vec<Job>> {
        let interrupted = JobError::interrupted(ErrorKind::AnalysisFailed);
        let sql = format!(
            "UPDATE analysis_job \
             SET status = 'error', \
                 error_kind = CASE status \
                     WHEN 'extracting' THEN $1 \
                     WHEN 'retrieving' THEN $2 \
                     ELSE $3 END, \
                 error_message = $4, \
                 updated_at = $5 \
             WHERE status IN ('extracting', 'retrieving', 'analyzing') \
             RETURNING {JOB_COLUMNS}"
        );
        let rows = sqlx::query(&sql)
            .bind(ErrorKind::ExtractionFailed.as_str())
            .bind(ErrorKind::RetrievalFailed.as_str())
            .bind(ErrorKind::AnalysisFailed.as_str())
            .bind(&interrupted.message)
            .bind(Utc::now())
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        if !rows.is_empty() {
            info!(
                subsystem = "database",
                component = "jobs",
                op = "fail_interrupted",
                count = rows.len(),
                "Failed jobs interrupted by restart"
            );
        }
        rows.into_iter().map(Self::parse_job_row).collect()
    }
}
