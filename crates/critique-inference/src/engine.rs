//! Inference engine boundary.

use async_trait::async_trait;

use critique_core::Result;

/// Which pass of the two-pass protocol a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InferenceTask {
    /// Pass 1: score the image against the rubric.
    Extraction,
    /// Pass 2: write the critique.
    Critique,
}

impl InferenceTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            InferenceTask::Extraction => "extraction",
            InferenceTask::Critique => "critique",
        }
    }
}

/// One multimodal generation call.
#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    pub task: InferenceTask,
    pub image: &'a [u8],
    pub mime_type: &'a str,
    /// Persona, possibly augmented with comparative context.
    pub system: &'a str,
    pub prompt: &'a str,
    /// Advisor whose fine-tuned adapter should serve the call; `None` runs
    /// the base model.
    pub adapter: Option<&'a str>,
}

/// A vision-language model behind an opaque interface.
///
/// Implementations are not required to tolerate concurrent calls; the
/// orchestrator serializes access.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Run one generation and return the raw model text.
    async fn generate(&self, req: GenerateRequest<'_>) -> Result<String>;

    /// Whether a fine-tuned adapter exists for `advisor_id`.
    async fn has_adapter(&self, advisor_id: &str) -> Result<bool>;

    /// Whether the engine is reachable.
    async fn health_check(&self) -> Result<bool>;

    /// Base model name.
    fn model_name(&self) -> &str;
}
