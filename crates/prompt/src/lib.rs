//! Prompt system for kbase.
//!
//! Answer prompts are YAML definitions with a system instruction and two
//! Handlebars user templates: one for questions with retrieved context and
//! one for questions without.

pub mod builder;
pub mod loader;
pub mod types;

// Re-export main types
pub use builder::build_rag_prompt;
pub use loader::load_prompt;
pub use types::{BuiltPrompt, BuiltPromptMetadata, PromptDefinition, DEFAULT_RAG_PROMPT_ID};
