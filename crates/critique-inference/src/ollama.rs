//! Ollama vision-language engine.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use critique_core::defaults::{
    DEFAULT_OLLAMA_VISION_MODEL, ENV_OLLAMA_VISION_MODEL, INFERENCE_TEMPERATURE,
    INFERENCE_TIMEOUT_SECS, OLLAMA_URL,
};
use critique_core::{Error, Result};

use crate::adapters::AdapterCatalog;
use crate::engine::{GenerateRequest, InferenceEngine};

/// Environment variable overriding the per-call timeout.
pub const ENV_INFERENCE_TIMEOUT_SECS: &str = "INFERENCE_TIMEOUT_SECS";

/// Ollama-backed engine posting images to `/api/generate`.
pub struct OllamaVisionEngine {
    base_url: String,
    model: String,
    client: reqwest::Client,
    timeout: Duration,
    adapters: AdapterCatalog,
}

impl OllamaVisionEngine {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        adapters: AdapterCatalog,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(INFERENCE_TIMEOUT_SECS),
            adapters,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build from `OLLAMA_BASE`/`OLLAMA_URL`, `OLLAMA_VISION_MODEL`,
    /// `INFERENCE_TIMEOUT_SECS` and `CRITIQUE_ADAPTER_DIR`.
    pub fn from_env() -> Self {
        let base_url = std::env::var("OLLAMA_BASE")
            .or_else(|_| std::env::var("OLLAMA_URL"))
            .unwrap_or_else(|_| OLLAMA_URL.to_string());
        let model = std::env::var(ENV_OLLAMA_VISION_MODEL)
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OLLAMA_VISION_MODEL.to_string());
        let timeout_secs = std::env::var(ENV_INFERENCE_TIMEOUT_SECS)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(INFERENCE_TIMEOUT_SECS);
        Self::new(base_url, model, AdapterCatalog::from_env())
            .with_timeout(Duration::from_secs(timeout_secs))
    }

    pub fn adapters(&self) -> &AdapterCatalog {
        &self.adapters
    }
}

#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    images: Vec<String>, // base64 encoded
    stream: bool,
    format: &'a str,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

#[async_trait]
impl InferenceEngine for OllamaVisionEngine {
    async fn generate(&self, req: GenerateRequest<'_>) -> Result<String> {
        use base64::Engine;

        if req.image.is_empty() {
            return Err(Error::Validation("image is empty".into()));
        }

        let model = match req.adapter {
            Some(advisor_id) => self.adapters.serving_model(advisor_id).await?,
            None => self.model.clone(),
        };

        let request = OllamaGenerateRequest {
            model: &model,
            system: req.system,
            prompt: req.prompt,
            images: vec![base64::engine::general_purpose::STANDARD.encode(req.image)],
            stream: false,
            format: "json",
            options: OllamaOptions {
                temperature: INFERENCE_TEMPERATURE,
            },
        };

        let start = Instant::now();
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Inference(format!(
                        "{} request timed out after {}s",
                        req.task.as_str(),
                        self.timeout.as_secs()
                    ))
                } else {
                    Error::Inference(format!("{} request failed: {}", req.task.as_str(), e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(
                subsystem = "inference",
                component = "ollama",
                op = req.task.as_str(),
                model = %model,
                status = status.as_u16(),
                "Inference request rejected"
            );
            return Err(Error::Inference(format!(
                "Ollama returned {}: {}",
                status, body
            )));
        }

        let result: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Failed to parse Ollama response: {}", e)))?;

        debug!(
            subsystem = "inference",
            component = "ollama",
            op = req.task.as_str(),
            model = %model,
            mime_type = req.mime_type,
            prompt_len = req.prompt.len(),
            response_len = result.response.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Inference complete"
        );
        Ok(result.response)
    }

    async fn has_adapter(&self, advisor_id: &str) -> Result<bool> {
        self.adapters.exists(advisor_id).await
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
