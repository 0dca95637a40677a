//! Error types for the critique pipeline.

use thiserror::Error;

use crate::models::{ErrorKind, JobStatus};

/// Result type alias using the pipeline's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for critique operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),

    /// Bad or missing input, rejected before any job is created
    #[error("Validation error: {0}")]
    Validation(String),

    /// The fallback chain was exhausted without finding an available strategy
    #[error("No strategy available for mode '{mode}' (advisor {advisor_id})")]
    NoStrategyAvailable { mode: String, advisor_id: String },

    /// Retrieval found no comparable reference profiles for the advisor
    #[error("No reference data for advisor {advisor_id}")]
    NoReferenceData { advisor_id: String },

    /// Pass 1 produced no usable dimensional profile
    #[error("Extraction failed: {0}")]
    Extraction(String),

    /// Pass 2 produced no usable critique
    #[error("Analysis failed: {0}")]
    Analysis(String),

    /// Inference engine call failed (transport, timeout, non-2xx)
    #[error("Inference error: {0}")]
    Inference(String),

    /// Job state machine rejected a transition
    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Map an error raised during a pipeline stage onto the persisted taxonomy.
    ///
    /// `stage` is the kind to use when the error itself does not name one
    /// (transport failures and timeouts surface as the pass that was running).
    /// A validation error raised mid-pipeline is a failure of that stage:
    /// `validation_error` belongs to rejected submissions, which never become
    /// jobs.
    pub fn kind_or(&self, stage: ErrorKind) -> ErrorKind {
        match self {
            Error::NoStrategyAvailable { .. } => ErrorKind::NoStrategyAvailable,
            Error::NoReferenceData { .. } => ErrorKind::RetrievalFailed,
            Error::Extraction(_) => ErrorKind::ExtractionFailed,
            Error::Analysis(_) => ErrorKind::AnalysisFailed,
            _ => stage,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
