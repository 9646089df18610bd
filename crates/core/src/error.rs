//! Error types for kbase.
//!
//! One enum covers every failure category in the workspace: configuration,
//! I/O, model calls, embeddings, retrieval, ingestion and persistence.

use thiserror::Error;

/// Unified error type for kbase.
///
/// All fallible functions return `Result<T, AppError>`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Chat completion provider errors
    #[error("LLM error: {0}")]
    Llm(String),

    /// Embedding service errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Vector index query errors
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Knowledge base errors
    #[error("Knowledge error: {0}")]
    Knowledge(String),

    /// Prompt system errors
    #[error("Prompt error: {0}")]
    Prompt(String),

    /// Rejected uploads (unsupported type, MIME or size)
    #[error("Invalid input: {0}")]
    Input(String),

    /// Text extraction failures
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Conversation and message store failures
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Timeouts, rate limits and other retryable failures
    #[error("Transient error: {0}")]
    Transient(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Transient(_))
    }

    /// Whether the caller sent something we refuse to process.
    pub fn is_client_error(&self) -> bool {
        matches!(self, AppError::Input(_))
    }

    /// Message safe to show to end users.
    ///
    /// Input errors are returned verbatim; everything else is replaced by a
    /// generic message and should be logged by the caller.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Input(msg) => msg.clone(),
            _ => "Failed to process question".to_string(),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
