//! Centralized default constants for the critique pipeline.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers; `from_env()` constructors fall back to them.

// =============================================================================
// ANALYSIS
// =============================================================================

/// Process-wide default analysis mode when a request does not name one.
pub const DEFAULT_MODE: &str = "rag";

/// Environment variable overriding [`DEFAULT_MODE`].
pub const ENV_DEFAULT_MODE: &str = "CRITIQUE_DEFAULT_MODE";

/// Number of reference profiles retrieved for comparison.
pub const SIMILAR_K: usize = 3;

/// Environment variable overriding [`SIMILAR_K`].
pub const ENV_SIMILAR_K: &str = "CRITIQUE_SIMILAR_K";

/// Upper bound on `k` accepted from configuration.
pub const SIMILAR_K_MAX: usize = 20;

// =============================================================================
// STRATEGY AVAILABILITY CACHE
// =============================================================================

/// Advisors whose adapter availability is remembered.
pub const STRATEGY_CACHE_SIZE: usize = 64;

/// Seconds before a cached availability answer is re-checked.
pub const STRATEGY_CACHE_TTL_SECS: u64 = 300;

// =============================================================================
// UPLOADS
// =============================================================================

/// Where submitted images are stored (the working set).
pub const UPLOAD_DIR: &str = "/var/lib/critique/uploads";

/// Environment variable overriding [`UPLOAD_DIR`].
pub const ENV_UPLOAD_DIR: &str = "CRITIQUE_UPLOAD_DIR";

/// Maximum accepted image size.
pub const MAX_IMAGE_BYTES: usize = 25 * 1024 * 1024;

/// Environment variable naming a YAML advisor catalog.
pub const ENV_ADVISORS_FILE: &str = "CRITIQUE_ADVISORS_FILE";

// =============================================================================
// INFERENCE
// =============================================================================

/// Default Ollama endpoint.
pub const OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Environment variable naming the vision model.
pub const ENV_OLLAMA_VISION_MODEL: &str = "OLLAMA_VISION_MODEL";

/// Default vision-language model.
pub const DEFAULT_OLLAMA_VISION_MODEL: &str = "qwen2.5vl:7b";

/// Directory holding per-advisor LoRA adapter artifacts.
pub const ADAPTER_DIR: &str = "/var/lib/critique/adapters";

/// Environment variable overriding [`ADAPTER_DIR`].
pub const ENV_ADAPTER_DIR: &str = "CRITIQUE_ADAPTER_DIR";

/// Per-call inference timeout; expiry is reported as a pass failure.
pub const INFERENCE_TIMEOUT_SECS: u64 = 300;

/// Sampling temperature for both passes.
pub const INFERENCE_TEMPERATURE: f32 = 0.2;

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Polling interval when the queue is empty (milliseconds).
///
/// The worker is also woken directly on submit, so this only bounds how long
/// a job submitted by another process waits.
pub const JOB_POLL_INTERVAL_MS: u64 = 500;

/// Default number of jobs returned by list endpoints.
pub const JOB_LIST_LIMIT: i64 = 50;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

/// Broadcast buffer for the event bus.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// SSE keep-alive interval.
pub const SSE_KEEPALIVE_SECS: u64 = 15;

/// Maximum request body size (multipart upload included).
pub const MAX_BODY_SIZE_BYTES: usize = 32 * 1024 * 1024;

/// Maximum reference profiles accepted in one import request.
pub const BATCH_IMPORT_MAX: usize = 500;
