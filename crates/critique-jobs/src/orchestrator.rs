//! Job orchestrator: submission, the two-pass protocol, and job queries.
//!
//! A job moves `queued → extracting → (retrieving) → analyzing → done`, or to
//! `error` from any non-terminal state. Every transition is persisted first
//! and published second, so a status read never sees a state older than the
//! last event a subscriber received.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use critique_core::defaults::{
    BATCH_IMPORT_MAX, DEFAULT_MODE, ENV_DEFAULT_MODE, ENV_SIMILAR_K, ENV_UPLOAD_DIR,
    MAX_IMAGE_BYTES, SIMILAR_K, SIMILAR_K_MAX, UPLOAD_DIR,
};
use critique_core::{
    AdvisorCatalog, AnalysisMode, CreateJobRequest, CritiqueResult, DimensionalProfile, Error,
    ErrorKind, Job, JobError, JobStatus, QueueStats, Result, ServerEvent, UpsertProfileRequest,
};
use critique_db::Stores;
use critique_inference::{
    critique_prompt, extraction_prompt, parse_critique, parse_extraction, ExclusiveEngine,
    GenerateRequest, InferenceTask,
};
use critique_search::{ContextAugmenter, SimilarityEngine};

use crate::progress::ProgressPublisher;
use crate::strategy::{StrategyConfig, StrategyResolver};

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Mode used when a submission does not name one.
    pub default_mode: AnalysisMode,
    /// References retrieved per job.
    pub similar_k: usize,
    /// Working-set directory for submitted images.
    pub upload_dir: PathBuf,
    pub max_image_bytes: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_mode: AnalysisMode::Rag,
            similar_k: SIMILAR_K,
            upload_dir: PathBuf::from(UPLOAD_DIR),
            max_image_bytes: MAX_IMAGE_BYTES,
        }
    }
}

impl OrchestratorConfig {
    /// Read settings from the environment.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `CRITIQUE_DEFAULT_MODE` | `rag` |
    /// | `CRITIQUE_SIMILAR_K` | `3` (capped at 20) |
    /// | `CRITIQUE_UPLOAD_DIR` | `/var/lib/critique/uploads` |
    ///
    /// An unrecognized default mode is a configuration error rather than a
    /// silent fallback.
    pub fn from_env() -> Result<Self> {
        let default_mode = std::env::var(ENV_DEFAULT_MODE)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODE.to_string())
            .parse::<AnalysisMode>()
            .map_err(|e| Error::Config(format!("{}: {}", ENV_DEFAULT_MODE, e)))?;

        let similar_k = std::env::var(ENV_SIMILAR_K)
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(SIMILAR_K)
            .clamp(1, SIMILAR_K_MAX);

        let upload_dir = std::env::var(ENV_UPLOAD_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(UPLOAD_DIR));

        Ok(Self {
            default_mode,
            similar_k,
            upload_dir,
            max_image_bytes: MAX_IMAGE_BYTES,
        })
    }

    pub fn with_default_mode(mut self, mode: AnalysisMode) -> Self {
        self.default_mode = mode;
        self
    }

    /// Clamped to `1..=SIMILAR_K_MAX`, like `CRITIQUE_SIMILAR_K`.
    pub fn with_similar_k(mut self, k: usize) -> Self {
        self.similar_k = k.clamp(1, SIMILAR_K_MAX);
        self
    }

    pub fn with_upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = dir.into();
        self
    }

    pub fn with_max_image_bytes(mut self, max: usize) -> Self {
        self.max_image_bytes = max;
        self
    }
}

/// A new analysis request.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub advisor_id: String,
    /// `None` uses the configured default.
    pub mode: Option<AnalysisMode>,
    pub image: Vec<u8>,
}

/// Reachability of the collaborators plus queue counts.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub database: bool,
    pub inference: bool,
    pub model: String,
    pub queue: QueueStats,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.database && self.inference
    }
}

/// Attach the persisted failure kind to a stage error.
trait StageExt<T> {
    fn stage(self, kind: ErrorKind) -> std::result::Result<T, JobError>;
}

impl<T> StageExt<T> for Result<T> {
    fn stage(self, kind: ErrorKind) -> std::result::Result<T, JobError> {
        self.map_err(|e| JobError::from_error(&e, kind))
    }
}

/// Drives jobs through the pipeline.
pub struct Orchestrator {
    stores: Stores,
    advisors: Arc<AdvisorCatalog>,
    engine: Arc<ExclusiveEngine>,
    resolver: StrategyResolver,
    similarity: SimilarityEngine,
    augmenter: ContextAugmenter,
    progress: ProgressPublisher,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        stores: Stores,
        advisors: Arc<AdvisorCatalog>,
        engine: Arc<ExclusiveEngine>,
        progress: ProgressPublisher,
        config: OrchestratorConfig,
    ) -> Self {
        Self::with_strategy_config(
            stores,
            advisors,
            engine,
            progress,
            config,
            StrategyConfig::default(),
        )
    }

    pub fn with_strategy_config(
        stores: Stores,
        advisors: Arc<AdvisorCatalog>,
        engine: Arc<ExclusiveEngine>,
        progress: ProgressPublisher,
        config: OrchestratorConfig,
        strategy: StrategyConfig,
    ) -> Self {
        Self {
            resolver: StrategyResolver::new(stores.profiles.clone(), engine.clone(), strategy),
            similarity: SimilarityEngine::new(stores.profiles.clone()),
            augmenter: ContextAugmenter::default(),
            stores,
            advisors,
            engine,
            progress,
            config,
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn advisors(&self) -> &AdvisorCatalog {
        &self.advisors
    }

    pub fn progress(&self) -> &ProgressPublisher {
        &self.progress
    }

    pub fn resolver(&self) -> &StrategyResolver {
        &self.resolver
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // =========================================================================
    // SUBMISSION
    // =========================================================================

    /// Validate and store the image, then queue a job.
    ///
    /// Returns immediately; the worker picks the job up. Invalid input fails
    /// with [`Error::Validation`] and no job is created.
    pub async fn submit(&self, req: SubmitRequest) -> Result<Job> {
        self.advisors.require(&req.advisor_id)?;
        let mode = req.mode.unwrap_or(self.config.default_mode);
        let image_path = self.store_upload(&req.image).await?;

        let job = self
            .stores
            .jobs
            .create(CreateJobRequest {
                advisor_id: req.advisor_id.clone(),
                image_path,
                mode_requested: mode,
            })
            .await?;

        info!(
            subsystem = "jobs",
            component = "orchestrator",
            op = "submit",
            job_id = %job.id,
            advisor_id = %job.advisor_id,
            mode_requested = %mode,
            image_bytes = req.image.len(),
            "Job queued"
        );
        self.progress.publish(ServerEvent::JobQueued {
            job_id: job.id,
            advisor_id: job.advisor_id.clone(),
            mode_requested: mode,
        });
        Ok(job)
    }

    /// Write the image into the working set under its content hash.
    async fn store_upload(&self, bytes: &[u8]) -> Result<String> {
        if bytes.is_empty() {
            return Err(Error::Validation("image is empty".into()));
        }
        if bytes.len() > self.config.max_image_bytes {
            return Err(Error::Validation(format!(
                "image is {} bytes, limit is {}",
                bytes.len(),
                self.config.max_image_bytes
            )));
        }
        let kind = infer::get(bytes)
            .filter(|t| t.matcher_type() == infer::MatcherType::Image)
            .ok_or_else(|| Error::Validation("upload is not a recognized image".into()))?;

        let digest = hex::encode(Sha256::digest(bytes));
        let path = self
            .config
            .upload_dir
            .join(format!("{}.{}", digest, kind.extension()));

        tokio::fs::create_dir_all(&self.config.upload_dir).await?;
        if !tokio::fs::try_exists(&path).await? {
            // Written aside and renamed, so the content-addressed name only
            // ever holds complete files.
            let partial = self
                .config
                .upload_dir
                .join(format!(".{}.{}.part", digest, critique_core::new_v7().simple()));
            tokio::fs::write(&partial, bytes).await?;
            if let Err(e) = tokio::fs::rename(&partial, &path).await {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e.into());
            }
            debug!(
                subsystem = "jobs",
                component = "orchestrator",
                path = %path.display(),
                mime_type = kind.mime_type(),
                "Stored upload"
            );
        }
        Ok(path.to_string_lossy().into_owned())
    }

    // =========================================================================
    // EXECUTION
    // =========================================================================

    /// Run a queued job to a terminal state.
    ///
    /// Pipeline failures end the job in `error` and still return `Ok` with
    /// the failed job; `Err` means the job store itself could not be updated.
    pub async fn run_job(&self, job: Job) -> Result<Job> {
        let start = Instant::now();
        let job_id = job.id;

        match self.drive(&job).await {
            Ok(result) => {
                let done = self.stores.jobs.complete(job_id, &result).await?;
                let mode_effective = done.mode_effective.unwrap_or(result.mode);
                self.progress.publish(ServerEvent::JobCompleted {
                    job_id,
                    mode_requested: done.mode_requested,
                    mode_effective,
                    fell_back: done.fell_back,
                });
                info!(
                    subsystem = "jobs",
                    component = "orchestrator",
                    job_id = %job_id,
                    advisor_id = %done.advisor_id,
                    mode_requested = %done.mode_requested,
                    mode_effective = %mode_effective,
                    fell_back = done.fell_back,
                    references = result.references.len(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job completed"
                );
                Ok(done)
            }
            Err(failure) => {
                let failed = self.stores.jobs.fail(job_id, &failure).await?;
                self.progress.publish(ServerEvent::JobFailed {
                    job_id,
                    kind: failure.kind,
                    message: failure.message.clone(),
                    progress_percent: failed.progress_percent,
                });
                warn!(
                    subsystem = "jobs",
                    component = "orchestrator",
                    job_id = %job_id,
                    advisor_id = %failed.advisor_id,
                    error_kind = %failure.kind,
                    error = %failure.message,
                    progress_percent = failed.progress_percent,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job failed"
                );
                Ok(failed)
            }
        }
    }

    async fn drive(&self, job: &Job) -> std::result::Result<CritiqueResult, JobError> {
        // An advisor removed from the catalog after submission leaves no
        // strategy to run the job with.
        let advisor = self
            .advisors
            .require(&job.advisor_id)
            .stage(ErrorKind::NoStrategyAvailable)?
            .clone();

        // Strategy is chosen once. A mode recorded before a restart is kept,
        // and later failures never downgrade it.
        let mode = match job.mode_effective {
            Some(mode) => mode,
            None => {
                let resolution = self
                    .resolver
                    .resolve(job.mode_requested, &job.advisor_id, &job.image_path)
                    .await
                    .stage(ErrorKind::NoStrategyAvailable)?;
                self.stores
                    .jobs
                    .set_effective_mode(job.id, resolution.effective, resolution.fell_back)
                    .await
                    .stage(ErrorKind::NoStrategyAvailable)?;
                resolution.effective
            }
        };

        let image = tokio::fs::read(&job.image_path)
            .await
            .map_err(Error::from)
            .stage(ErrorKind::ExtractionFailed)?;
        let mime_type = infer::get(&image)
            .map(|t| t.mime_type())
            .unwrap_or("application/octet-stream");

        // Pass 1
        self.advance(job.id, JobStatus::Extracting, "extracting dimensional profile")
            .await
            .stage(ErrorKind::ExtractionFailed)?;
        let profile = self
            .extract(job, &advisor.persona, &extraction_prompt(&advisor), &image, mime_type)
            .await
            .stage(ErrorKind::ExtractionFailed)?;

        // Retrieval, for modes that compare against references
        let (system, references) = if mode.uses_retrieval() {
            self.advance(job.id, JobStatus::Retrieving, "retrieving reference profiles")
                .await
                .stage(ErrorKind::RetrievalFailed)?;
            let similar = self
                .similarity
                .find_similar(&job.advisor_id, &profile, self.config.similar_k)
                .await
                .stage(ErrorKind::RetrievalFailed)?;
            let augmented = self.augmenter.augment(&advisor.persona, &profile, &similar);
            (augmented.prompt, augmented.references)
        } else {
            (advisor.persona.clone(), Vec::new())
        };

        // Pass 2
        self.advance(job.id, JobStatus::Analyzing, "generating critique")
            .await
            .stage(ErrorKind::AnalysisFailed)?;
        let prompt = critique_prompt(&profile, mode.uses_retrieval());
        let started = Instant::now();
        let raw = self
            .engine
            .generate(GenerateRequest {
                task: InferenceTask::Critique,
                image: &image,
                mime_type,
                system: &system,
                prompt: &prompt,
                adapter: mode.uses_adapter().then_some(job.advisor_id.as_str()),
            })
            .await
            .stage(ErrorKind::AnalysisFailed)?;
        let critique = parse_critique(&raw).stage(ErrorKind::AnalysisFailed)?;
        debug!(
            subsystem = "jobs",
            component = "orchestrator",
            op = "critique",
            job_id = %job.id,
            mode = %mode,
            prompt_len = system.len() + prompt.len(),
            dimensions = critique.dimensions.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Pass 2 complete"
        );

        Ok(CritiqueResult {
            advisor_id: job.advisor_id.clone(),
            mode,
            summary: critique.summary,
            overall_grade: critique.overall_grade.or(profile.overall_grade),
            dimensions: critique.dimensions,
            query_scores: profile.scores,
            references,
            html: None,
        })
    }

    /// Pass 1: score the image and record it as a working-set profile.
    ///
    /// Nothing is written when the model output cannot be parsed.
    async fn extract(
        &self,
        job: &Job,
        system: &str,
        prompt: &str,
        image: &[u8],
        mime_type: &str,
    ) -> Result<DimensionalProfile> {
        let started = Instant::now();
        let raw = self
            .engine
            .generate(GenerateRequest {
                task: InferenceTask::Extraction,
                image,
                mime_type,
                system,
                prompt,
                adapter: None,
            })
            .await?;
        let mut req = parse_extraction(&raw, &job.advisor_id, &job.image_path)?;
        req.working_set = true;

        let profile = self.stores.profiles.put(req).await?;
        debug!(
            subsystem = "jobs",
            component = "orchestrator",
            op = "extract",
            job_id = %job.id,
            scored_dimensions = profile.scores.present_count(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Pass 1 complete"
        );
        self.progress.publish(ServerEvent::ProfileStored {
            advisor_id: profile.advisor_id.clone(),
            image_path: profile.image_path.clone(),
            working_set: true,
        });
        Ok(profile)
    }

    /// Persist a non-terminal transition, then publish it.
    async fn advance(&self, job_id: Uuid, to: JobStatus, message: &str) -> Result<Job> {
        let job = self
            .stores
            .jobs
            .transition(job_id, to, to.entry_progress())
            .await?;
        self.progress.publish(ServerEvent::JobProgress {
            job_id,
            status: job.status,
            progress_percent: job.progress_percent,
            mode_effective: job.mode_effective,
            fell_back: job.fell_back,
            message: Some(message.to_string()),
        });
        Ok(job)
    }

    /// Fail a job whose outcome `run_job` could not record.
    ///
    /// The kind is taken from the pass the job was left in; a job still
    /// `queued` failed while its strategy was being resolved. A job that is
    /// already terminal is returned unchanged.
    pub async fn abandon(&self, job_id: Uuid, cause: &Error) -> Result<Job> {
        let job = self.get_job(job_id).await?;
        if job.status.is_terminal() {
            return Ok(job);
        }
        let kind = job
            .status
            .stage_kind()
            .unwrap_or(ErrorKind::NoStrategyAvailable);
        let failure = JobError::new(kind, format!("outcome could not be recorded: {}", cause));
        let failed = self.stores.jobs.fail(job_id, &failure).await?;
        self.progress.publish(ServerEvent::JobFailed {
            job_id,
            kind,
            message: failure.message,
            progress_percent: failed.progress_percent,
        });
        Ok(failed)
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    pub async fn get_job(&self, job_id: Uuid) -> Result<Job> {
        self.stores
            .jobs
            .get(job_id)
            .await?
            .ok_or(Error::JobNotFound(job_id))
    }

    pub async fn list_jobs(&self, limit: i64) -> Result<Vec<Job>> {
        self.stores.jobs.list_recent(limit.clamp(1, 500)).await
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        self.stores.jobs.queue_stats().await
    }

    pub async fn health(&self) -> HealthReport {
        let database = self.stores.is_healthy().await;
        let inference = self.engine.health_check().await.unwrap_or(false);
        let queue = self.queue_stats().await.unwrap_or_default();
        HealthReport {
            database,
            inference,
            model: self.engine.model_name().to_string(),
            queue,
        }
    }

    // =========================================================================
    // REFERENCE PROFILES
    // =========================================================================

    /// Upsert an advisor's reference profiles.
    ///
    /// The whole batch is validated before anything is written. Imported
    /// profiles always take part in retrieval.
    pub async fn import_references(
        &self,
        advisor_id: &str,
        profiles: Vec<UpsertProfileRequest>,
    ) -> Result<Vec<DimensionalProfile>> {
        self.advisors.require(advisor_id)?;
        if profiles.is_empty() {
            return Err(Error::Validation("no profiles to import".into()));
        }
        if profiles.len() > BATCH_IMPORT_MAX {
            return Err(Error::Validation(format!(
                "batch of {} exceeds the limit of {}",
                profiles.len(),
                BATCH_IMPORT_MAX
            )));
        }

        let batch: Vec<UpsertProfileRequest> = profiles
            .into_iter()
            .map(|mut p| {
                p.advisor_id = advisor_id.to_string();
                p.working_set = false;
                p
            })
            .collect();
        for req in &batch {
            req.validate()?;
        }

        let mut stored = Vec::with_capacity(batch.len());
        for req in batch {
            let profile = self.stores.profiles.put(req).await?;
            self.progress.publish(ServerEvent::ProfileStored {
                advisor_id: profile.advisor_id.clone(),
                image_path: profile.image_path.clone(),
                working_set: false,
            });
            stored.push(profile);
        }
        info!(
            subsystem = "jobs",
            component = "orchestrator",
            op = "import_references",
            advisor_id = %advisor_id,
            result_count = stored.len(),
            "Reference profiles imported"
        );
        Ok(stored)
    }

    /// Reference profiles eligible for retrieval, oldest first.
    pub async fn list_references(&self, advisor_id: &str) -> Result<Vec<DimensionalProfile>> {
        self.advisors.require(advisor_id)?;
        self.stores.profiles.scan(advisor_id, &[]).await
    }
}
