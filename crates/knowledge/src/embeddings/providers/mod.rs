//! Embedding provider implementations.

pub mod mock;
pub mod ollama;
pub mod openai_compat;

pub use mock::MockEmbeddings;
pub use ollama::OllamaEmbeddings;
pub use openai_compat::OpenAiCompatEmbeddings;
