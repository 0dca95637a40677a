//! Exclusive access to the model-bearing accelerator.
//!
//! One [`ExclusiveEngine`] is built per process and shared by reference.
//! Generation calls queue on an async mutex, so at most one pass runs
//! inference at a time however many jobs are in flight. Adapter and health
//! checks do not touch the accelerator and skip the queue.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::trace;

use critique_core::Result;

use crate::engine::{GenerateRequest, InferenceEngine};

pub struct ExclusiveEngine {
    inner: Arc<dyn InferenceEngine>,
    gate: Mutex<()>,
}

impl ExclusiveEngine {
    pub fn new(inner: Arc<dyn InferenceEngine>) -> Self {
        Self {
            inner,
            gate: Mutex::new(()),
        }
    }

    /// Run one generation once the accelerator is free.
    pub async fn generate(&self, req: GenerateRequest<'_>) -> Result<String> {
        let waited = Instant::now();
        let _guard = self.gate.lock().await;
        trace!(
            task = req.task.as_str(),
            wait_ms = waited.elapsed().as_millis() as u64,
            "Acquired inference engine"
        );
        self.inner.generate(req).await
    }

    pub async fn has_adapter(&self, advisor_id: &str) -> Result<bool> {
        self.inner.has_adapter(advisor_id).await
    }

    pub async fn health_check(&self) -> Result<bool> {
        self.inner.health_check().await
    }

    pub fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
