//! Embedding configuration.

use crate::types::KnowledgeBaseConfig;
use kbase_core::{AppError, AppResult, LlmSettings};
use serde::{Deserialize, Serialize};

/// Default number of inputs per embeddings request.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Embedding configuration resolved for one knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    /// Provider name: "openai-compatible", "ollama", "mock"
    pub provider: String,

    /// Model identifier (provider-specific)
    pub model: String,

    /// Embedding vector dimensions
    pub dimensions: usize,

    /// Base URL; the provider default when `None`
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Maximum inputs per request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    pub timeout_secs: u64,

    /// Attempts per request for transient failures
    pub max_retries: u32,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self::from_settings(&LlmSettings::default())
    }
}

impl EmbeddingConfig {
    /// Configuration taken from the global LLM settings.
    pub fn from_settings(settings: &LlmSettings) -> Self {
        Self {
            provider: settings.provider.clone(),
            model: settings.embedding_model.clone(),
            dimensions: settings.embedding_dimensions,
            endpoint: settings.endpoint_override().map(str::to_string),
            batch_size: DEFAULT_BATCH_SIZE,
            timeout_secs: settings.embedding_timeout_secs,
            max_retries: settings.max_retries,
        }
    }

    /// Configuration for a base: global settings with the base's model and dimensions.
    pub fn for_base(settings: &LlmSettings, base: &KnowledgeBaseConfig) -> Self {
        Self {
            model: base.embedding_model.clone(),
            dimensions: base.embedding_dimensions,
            ..Self::from_settings(settings)
        }
    }

    /// Validate that another config produces vectors comparable with this one.
    pub fn validate_consistency(&self, other: &Self) -> AppResult<()> {
        if self.model != other.model {
            return Err(AppError::Embedding(format!(
                "Model mismatch: expected '{}', got '{}'",
                self.model, other.model
            )));
        }

        if self.dimensions != other.dimensions {
            return Err(AppError::Embedding(format!(
                "Dimension mismatch: expected {}, got {}",
                self.dimensions, other.dimensions
            )));
        }

        Ok(())
    }
}
