//! Chat model integration for kbase.
//!
//! Provider-agnostic chat completion behind the [`LlmClient`] trait, with
//! streaming deltas and retry on transient failures.
//!
//! # Providers
//! - **openai-compatible**: any `/chat/completions` endpoint (DashScope, OpenAI, vLLM)
//! - **ollama**: local runtime
//! - **mock**: offline, scripted or echo
//!
//! # Example
//! ```no_run
//! use kbase_llm::{ChatMessage, LlmClient, LlmRequest, providers::OllamaClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = OllamaClient::new();
//! let request = LlmRequest::new(vec![ChatMessage::user("Hello, world!")], "llama3");
//! let response = client.complete(&request).await?;
//! println!("{}", response.content);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod factory;
pub mod providers;
pub mod retry;
pub mod types;

// Re-export main types
pub use client::{
    ChatMessage, LlmClient, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk, LlmUsage, Role,
};
pub use factory::create_client;
pub use providers::{MockLlmClient, OllamaClient, OpenAiCompatClient, ScriptedDelta};
pub use retry::{status_error, transport_error, with_retries, RetryPolicy};
pub use types::ProviderType;
