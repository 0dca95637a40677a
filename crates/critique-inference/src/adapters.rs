//! Per-advisor LoRA adapter artifacts.
//!
//! Layout: `<root>/<advisor_id>/adapter_config.json` and/or
//! `<root>/<advisor_id>/adapter_model.safetensors`. Either file marks the
//! adapter as present. The Ollama model tag that serves the adapter is
//! `critique-<advisor_id>` unless `adapter_config.json` names one in
//! `serving_model`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use critique_core::defaults::{ADAPTER_DIR, ENV_ADAPTER_DIR};
use critique_core::{Error, Result};

/// Files whose presence marks an adapter as trained.
pub const ADAPTER_MARKERS: [&str; 2] = ["adapter_config.json", "adapter_model.safetensors"];

/// Prefix of the default serving model tag.
pub const SERVING_MODEL_PREFIX: &str = "critique-";

#[derive(Debug, Default, Deserialize)]
struct AdapterConfig {
    #[serde(default)]
    serving_model: Option<String>,
}

/// Filesystem catalog of trained adapters.
#[derive(Debug, Clone)]
pub struct AdapterCatalog {
    root: PathBuf,
}

impl AdapterCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_env() -> Self {
        let root = std::env::var(ENV_ADAPTER_DIR).unwrap_or_else(|_| ADAPTER_DIR.to_string());
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Advisor ids become path segments; only `[A-Za-z0-9_-]` is accepted.
    fn advisor_dir(&self, advisor_id: &str) -> Result<PathBuf> {
        let safe = !advisor_id.is_empty()
            && advisor_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !safe {
            return Err(Error::Validation(format!(
                "advisor id '{}' is not a valid adapter name",
                advisor_id
            )));
        }
        Ok(self.root.join(advisor_id))
    }

    /// Whether a trained adapter exists for `advisor_id`.
    pub async fn exists(&self, advisor_id: &str) -> Result<bool> {
        let dir = self.advisor_dir(advisor_id)?;
        for marker in ADAPTER_MARKERS {
            if tokio::fs::metadata(dir.join(marker))
                .await
                .map(|m| m.is_file())
                .unwrap_or(false)
            {
                debug!(
                    subsystem = "inference",
                    component = "adapters",
                    advisor_id = %advisor_id,
                    marker,
                    "Adapter found"
                );
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Model tag serving the adapter for `advisor_id`.
    pub async fn serving_model(&self, advisor_id: &str) -> Result<String> {
        let config_path = self.advisor_dir(advisor_id)?.join(ADAPTER_MARKERS[0]);
        let config = match tokio::fs::read_to_string(&config_path).await {
            Ok(text) => serde_json::from_str::<AdapterConfig>(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AdapterConfig::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(config
            .serving_model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| format!("{}{}", SERVING_MODEL_PREFIX, advisor_id)))
    }
}
