//! # critique-jobs
//!
//! Strategy resolution, job orchestration, the queue worker, and per-job
//! progress streams.
//!
//! - [`strategy`]: resolves a requested analysis mode to an available one
//! - [`orchestrator`]: submission and the two-pass extract-then-critique run
//! - [`worker`]: sequential background loop over queued jobs
//! - [`progress`]: ordered per-job event streams with late-join snapshots
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use critique_db::Stores;
//! use critique_inference::{ExclusiveEngine, OllamaVisionEngine};
//! use critique_jobs::*;
//!
//! let stores = Stores::in_memory();
//! let progress = ProgressPublisher::new(EventBus::default(), stores.jobs.clone());
//! let engine = Arc::new(ExclusiveEngine::new(Arc::new(OllamaVisionEngine::from_env())));
//! let orchestrator = Arc::new(Orchestrator::new(
//!     stores,
//!     Arc::new(AdvisorCatalog::builtin()),
//!     engine,
//!     progress,
//!     OrchestratorConfig::from_env()?,
//! ));
//!
//! let handle = JobWorker::new(orchestrator.clone(), WorkerConfig::from_env()).start();
//! let job = orchestrator
//!     .submit(SubmitRequest { advisor_id: "ansel_adams".into(), mode: None, image })
//!     .await?;
//! let mut events = orchestrator.progress().subscribe(job.id).await?;
//! ```

pub mod orchestrator;
pub mod progress;
pub mod strategy;
pub mod worker;

pub use orchestrator::{HealthReport, Orchestrator, OrchestratorConfig, SubmitRequest};
pub use progress::ProgressPublisher;
pub use strategy::{
    fallback_chain, resolve, Availability, Resolution, StrategyConfig, StrategyResolver,
};
pub use worker::{JobWorker, WorkerConfig, WorkerEvent, WorkerHandle};

// Re-export core types
pub use critique_core::*;
