//! # critique-inference
//!
//! The vision-language model boundary of the critique pipeline.
//!
//! - [`InferenceEngine`]: opaque multimodal generation plus adapter lookup
//! - [`OllamaVisionEngine`]: Ollama `/api/generate` implementation
//! - [`ExclusiveEngine`]: serializes generation on the single accelerator
//! - [`AdapterCatalog`]: per-advisor LoRA adapter artifacts on disk
//! - [`prompts`]: pass-1 and pass-2 prompt templates
//! - [`parse`]: tolerant decoding of model output into profiles and critiques
//!
//! # Feature Flags
//!
//! - `ollama` (default): Ollama engine
//! - `mock`: scripted [`mock::MockInferenceEngine`] for tests

pub mod adapters;
pub mod engine;
pub mod exclusive;
pub mod parse;
pub mod prompts;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use adapters::AdapterCatalog;
pub use engine::{GenerateRequest, InferenceEngine, InferenceTask};
pub use exclusive::ExclusiveEngine;
pub use parse::{
    extract_json_object, parse_critique, parse_extraction, strip_thinking, ParsedCritique,
};
pub use prompts::{critique_prompt, extraction_prompt};

#[cfg(feature = "ollama")]
pub use ollama::OllamaVisionEngine;
