//! Scripted inference engine for pipeline tests.
//!
//! ```rust,ignore
//! use critique_inference::mock::MockInferenceEngine;
//! use critique_inference::InferenceTask;
//!
//! let engine = MockInferenceEngine::new()
//!     .with_response(InferenceTask::Extraction, r#"{"scores": {"composition": 7}}"#)
//!     .with_adapter("ansel_adams");
//! assert_eq!(engine.call_count(), 0);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use critique_core::{Error, Result};

use crate::engine::{GenerateRequest, InferenceEngine, InferenceTask};

/// Extraction output used when none is scripted.
pub const DEFAULT_EXTRACTION: &str = r#"{
  "scores": {"composition": 8, "lighting": 8, "focus": 9, "color": 7,
             "isolation": 7, "depth": 7, "balance": 8, "emotion": 7},
  "comments": {"lighting": "Even, soft light."},
  "technique_tags": ["depth_of_field"]
}"#;

/// Critique output used when none is scripted.
pub const DEFAULT_CRITIQUE: &str = r#"{
  "summary": "A careful photograph that could be bolder.",
  "overall_grade": "B",
  "dimensions": [
    {"dimension": "composition", "score": 8, "comment": "Balanced framing.",
     "recommendation": "Lower the horizon."},
    {"dimension": "lighting", "score": 8, "comment": "Soft light."}
  ]
}"#;

/// One recorded call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub task: InferenceTask,
    pub system: String,
    pub prompt: String,
    pub adapter: Option<String>,
    pub image_len: usize,
}

#[derive(Debug, Clone)]
struct MockConfig {
    responses: HashMap<InferenceTask, String>,
    failures: HashSet<InferenceTask>,
    adapters: HashSet<String>,
    latency_ms: u64,
    healthy: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            responses: HashMap::from([
                (InferenceTask::Extraction, DEFAULT_EXTRACTION.to_string()),
                (InferenceTask::Critique, DEFAULT_CRITIQUE.to_string()),
            ]),
            failures: HashSet::new(),
            adapters: HashSet::new(),
            latency_ms: 0,
            healthy: true,
        }
    }
}

/// Mock engine with per-task canned responses and a call log.
#[derive(Clone)]
pub struct MockInferenceEngine {
    config: Arc<MockConfig>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl Default for MockInferenceEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockInferenceEngine {
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig::default()),
            call_log: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Raw text returned for `task`.
    pub fn with_response(mut self, task: InferenceTask, response: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config)
            .responses
            .insert(task, response.into());
        self
    }

    /// Make `task` fail like a transport error or timeout.
    pub fn with_failure(mut self, task: InferenceTask) -> Self {
        Arc::make_mut(&mut self.config).failures.insert(task);
        self
    }

    /// Report a trained adapter for `advisor_id`.
    pub fn with_adapter(mut self, advisor_id: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config)
            .adapters
            .insert(advisor_id.into());
        self
    }

    /// Simulated latency for every generation.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        Arc::make_mut(&mut self.config).latency_ms = latency_ms;
        self
    }

    pub fn with_health(mut self, healthy: bool) -> Self {
        Arc::make_mut(&mut self.config).healthy = healthy;
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.call_log.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }

    pub fn calls_for(&self, task: InferenceTask) -> usize {
        self.call_log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.task == task)
            .count()
    }

    /// Highest number of generations observed running at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceEngine for MockInferenceEngine {
    async fn generate(&self, req: GenerateRequest<'_>) -> Result<String> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        self.call_log.lock().unwrap().push(MockCall {
            task: req.task,
            system: req.system.to_string(),
            prompt: req.prompt.to_string(),
            adapter: req.adapter.map(str::to_string),
            image_len: req.image.len(),
        });

        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.config.failures.contains(&req.task) {
            return Err(Error::Inference(format!(
                "mock {} failure",
                req.task.as_str()
            )));
        }
        Ok(self
            .config
            .responses
            .get(&req.task)
            .cloned()
            .unwrap_or_default())
    }

    async fn has_adapter(&self, advisor_id: &str) -> Result<bool> {
        Ok(self.config.adapters.contains(advisor_id))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.config.healthy)
    }

    fn model_name(&self) -> &str {
        "mock-vision"
    }
}
