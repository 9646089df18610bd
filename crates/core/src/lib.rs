//! Core infrastructure for kbase.
//!
//! Shared by every crate in the workspace:
//! - [`error`]: the unified `AppError` type
//! - [`logging`]: tracing subscriber setup
//! - [`config`]: layered configuration (defaults, YAML, env, CLI)

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    AppConfig, ChunkingSettings, CoalesceSettings, LlmSettings, RetrievalSettings, UploadSettings,
};
pub use error::{AppError, AppResult};
