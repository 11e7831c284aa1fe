//! The seam between the service and whatever actually runs the model.
//!
//! The pipeline cache is the only caller of [`GenerationEngine::load`]; request
//! handling only ever sees the [`GenerationPipeline`] handles it hands out.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::ModelDescriptor;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Optional sampling knobs. With no temperature the engine decodes greedily.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl SamplingOptions {
    pub fn is_default(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    /// Upper bound on prompt plus generated tokens.
    pub max_length: usize,
    /// Whether returned candidates start with the prompt.
    pub return_full_text: bool,
    pub sampling: SamplingOptions,
}

impl GenerationParams {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            return_full_text: true,
            sampling: SamplingOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub generated_text: String,
}

/// A loaded model bound to one descriptor.
///
/// `generate` blocks for the duration of inference and is always called from
/// the blocking thread pool.
pub trait GenerationPipeline: Send + Sync {
    fn descriptor(&self) -> &ModelDescriptor;

    fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Vec<Candidate>, EngineError>;
}

pub trait GenerationEngine: Send + Sync {
    /// Loads weights and tokenizer for `descriptor`. Blocking.
    fn load(
        &self,
        descriptor: &ModelDescriptor,
    ) -> Result<Arc<dyn GenerationPipeline>, EngineError>;
}

#[cfg(test)]
pub(crate) mod testing;
