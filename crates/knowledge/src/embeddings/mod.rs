//! Text embeddings for knowledge bases.
//!
//! Provider-agnostic vector generation behind [`EmbeddingProvider`], with
//! per-base model configuration.

pub mod config;
pub mod provider;
pub mod providers;

pub use config::EmbeddingConfig;
pub use provider::{create_provider, mean_vectors, zero_vector, EmbeddingProvider};
pub use providers::{MockEmbeddings, OllamaEmbeddings, OpenAiCompatEmbeddings};
