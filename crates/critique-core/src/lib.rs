//! # critique-core
//!
//! Core types, traits, and abstractions for the photographic critique
//! pipeline.
//!
//! This crate provides the data model (rubric dimensions, dimensional
//! profiles, jobs, results), the error taxonomy, the event bus used for
//! progress delivery, the repository traits implemented by `critique-db`,
//! and the advisor catalog.
//!
//! ## Log level contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), job completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-candidate iteration (retrieval scoring) |
//!
//! Structured fields use the same names everywhere: `subsystem`,
//! `component`, `op`, `job_id`, `advisor_id`, `duration_ms`.

pub mod advisors;
pub mod defaults;
pub mod error;
pub mod events;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use advisors::{Advisor, AdvisorCatalog};
pub use error::{Error, Result};
pub use events::{EventBus, EventEnvelope, ServerEvent};
pub use models::*;
pub use traits::*;
pub use uuid_utils::new_v7;
