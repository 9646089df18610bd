//! Chat provider implementations.

pub mod mock;
pub mod ollama;
pub mod openai_compat;

pub use mock::{MockLlmClient, ScriptedDelta};
pub use ollama::OllamaClient;
pub use openai_compat::OpenAiCompatClient;
