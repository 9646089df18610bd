//! Configuration management for kbase.
//!
//! Configuration is merged from several sources, later ones winning:
//! - Built-in defaults
//! - The workspace config file (`.kbase/config.yaml`)
//! - Environment variables (`KBASE_*`)
//! - Command-line flags
//!
//! All workspace state lives under `.kbase/`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

/// Hosted endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

/// Providers the chat and embedding factories know how to build.
pub const KNOWN_PROVIDERS: [&str; 5] = ["openai-compatible", "openai", "dashscope", "ollama", "mock"];

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the workspace root (contains .kbase/)
    pub workspace: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Explicit API key (takes precedence over `llm.api_key_env`)
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Log level override
    pub log_level: Option<String>,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,

    /// Chat and embedding service settings
    pub llm: LlmSettings,

    /// Splitter and coalescer parameters
    pub chunking: ChunkingSettings,

    /// Question answering parameters
    pub retrieval: RetrievalSettings,

    /// Upload acceptance rules
    pub upload: UploadSettings,
}

/// Chat and embedding service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct LlmSettings {
    /// Provider name (see [`KNOWN_PROVIDERS`])
    pub provider: String,

    /// Base URL of the provider API
    pub endpoint: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Model used for answer generation
    pub chat_model: String,

    /// Model used for embeddings
    pub embedding_model: String,

    /// Embedding vector dimensions (also used for zero-vector placeholders)
    pub embedding_dimensions: usize,

    pub chat_timeout_secs: u64,

    pub embedding_timeout_secs: u64,

    /// Attempts per request for transient failures
    pub max_retries: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "openai-compatible".to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key_env: "DASHSCOPE_API_KEY".to_string(),
            chat_model: "qwen3-max".to_string(),
            embedding_model: "text-embedding-v1".to_string(),
            embedding_dimensions: 1536,
            chat_timeout_secs: 60,
            embedding_timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl LlmSettings {
    /// Endpoint to hand to the provider factories.
    ///
    /// `None` lets local providers use their own default when the hosted
    /// default endpoint was never changed.
    pub fn endpoint_override(&self) -> Option<&str> {
        let endpoint = self.endpoint.trim();
        let local = matches!(self.provider.to_lowercase().as_str(), "ollama" | "mock");
        if endpoint.is_empty() || (local && endpoint == DEFAULT_ENDPOINT) {
            None
        } else {
            Some(endpoint)
        }
    }
}

/// Splitter and coalescer parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ChunkingSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub coalesce: CoalesceSettings,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            coalesce: CoalesceSettings::default(),
        }
    }
}

/// Floor and ceiling enforced before embedding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CoalesceSettings {
    pub min_chars: usize,
    pub min_words: usize,
    pub max_chars: usize,
    pub max_words: usize,
}

impl Default for CoalesceSettings {
    fn default() -> Self {
        Self {
            min_chars: 200,
            min_words: 15,
            max_chars: 6000,
            max_words: 4000,
        }
    }
}

/// Question answering parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RetrievalSettings {
    /// Chunks requested from the vector index per question
    pub max_chunks: usize,

    /// Sampling temperature for answer generation
    pub temperature: f32,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            max_chunks: 5,
            temperature: 0.7,
        }
    }
}

/// Upload acceptance rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct UploadSettings {
    /// Maximum accepted file size in bytes
    pub max_file_size: u64,

    pub allowed_mime_types: Vec<String>,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            max_file_size: 100 * 1024 * 1024,
            allowed_mime_types: [
                "application/pdf",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                "application/vnd.openxmlformats-officedocument.presentationml.presentation",
                "application/msword",
                "application/vnd.ms-excel",
                "application/vnd.ms-powerpoint",
                "text/plain",
                "text/markdown",
                "text/csv",
                "application/json",
                "text/html",
                "image/jpeg",
                "image/png",
                "image/gif",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Full configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    workspace: Option<WorkspaceConfig>,
    logging: Option<LoggingConfig>,
    llm: Option<LlmSettings>,
    chunking: Option<ChunkingSettings>,
    retrieval: Option<RetrievalSettings>,
    upload: Option<UploadSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkspaceConfig {
    path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
    color: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            api_key: None,
            log_level: None,
            verbose: false,
            no_color: false,
            llm: LlmSettings::default(),
            chunking: ChunkingSettings::default(),
            retrieval: RetrievalSettings::default(),
            upload: UploadSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, the config file and the environment.
    ///
    /// Environment variables:
    /// - `KBASE_WORKSPACE`: Override workspace path
    /// - `KBASE_CONFIG`: Path to config file
    /// - `KBASE_PROVIDER`: Chat/embedding provider
    /// - `KBASE_MODEL`: Chat model
    /// - `KBASE_ENDPOINT`: Provider base URL
    /// - `KBASE_API_KEY`: API key
    /// - `RUST_LOG`: Log level
    /// - `NO_COLOR`: Disable colored output
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();

        if let Ok(workspace) = std::env::var("KBASE_WORKSPACE") {
            config.workspace = PathBuf::from(workspace);
        }

        if let Ok(config_file) = std::env::var("KBASE_CONFIG") {
            config.config_file = Some(PathBuf::from(config_file));
        }

        if !config.workspace.exists() {
            return Err(AppError::Config(format!(
                "Workspace directory does not exist: {:?}",
                config.workspace
            )));
        }

        let config_path = config
            .config_file
            .clone()
            .unwrap_or_else(|| config.kbase_dir().join("config.yaml"));

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        }

        // Environment variables override YAML config
        if let Ok(provider) = std::env::var("KBASE_PROVIDER") {
            config.llm.provider = provider;
        }

        if let Ok(model) = std::env::var("KBASE_MODEL") {
            config.llm.chat_model = model;
        }

        if let Ok(endpoint) = std::env::var("KBASE_ENDPOINT") {
            config.llm.endpoint = endpoint;
        }

        config.api_key = std::env::var("KBASE_API_KEY").ok();

        if let Ok(level) = std::env::var("RUST_LOG") {
            config.log_level = Some(level);
        }

        if std::env::var_os("NO_COLOR").is_some() {
            config.no_color = true;
        }

        Ok(config)
    }

    /// Merge a YAML configuration file into a copy of this config.
    pub fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config_file: ConfigFile = if contents.trim().is_empty() {
            ConfigFile::default()
        } else {
            serde_yaml::from_str(&contents).map_err(|e| {
                AppError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?
        };

        let mut result = self.clone();

        if let Some(path) = config_file.workspace.and_then(|ws| ws.path) {
            result.workspace = PathBuf::from(path);
        }

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
        }

        if let Some(llm) = config_file.llm {
            result.llm = llm;
        }
        if let Some(chunking) = config_file.chunking {
            result.chunking = chunking;
        }
        if let Some(retrieval) = config_file.retrieval {
            result.retrieval = retrieval;
        }
        if let Some(upload) = config_file.upload {
            result.upload = upload;
        }

        Ok(result)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// Flags take precedence over environment variables and the config file.
    #[allow(clippy::too_many_arguments)]
    pub fn with_overrides(
        mut self,
        workspace: Option<PathBuf>,
        config_file: Option<PathBuf>,
        provider: Option<String>,
        model: Option<String>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(workspace) = workspace {
            self.workspace = workspace;
        }

        if let Some(config_file) = config_file {
            self.config_file = Some(config_file);
        }

        if let Some(provider) = provider {
            self.llm.provider = provider;
        }

        if let Some(model) = model {
            self.llm.chat_model = model;
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            // Verbose mode implies debug logging
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Path to the .kbase directory.
    pub fn kbase_dir(&self) -> PathBuf {
        self.workspace.join(".kbase")
    }

    /// Ensure the .kbase directory exists.
    pub fn ensure_kbase_dir(&self) -> AppResult<()> {
        let dir = self.kbase_dir();
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| {
                AppError::Config(format!("Failed to create .kbase directory: {}", e))
            })?;
        }
        Ok(())
    }

    /// Resolve the API key: explicit key first, then the configured env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(ref key) = self.api_key {
            return Some(key.clone());
        }

        std::env::var(&self.llm.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    /// Validate provider and chunking parameters.
    pub fn validate(&self) -> AppResult<()> {
        let provider = self.llm.provider.to_lowercase();
        if !KNOWN_PROVIDERS.contains(&provider.as_str()) {
            return Err(AppError::Config(format!(
                "Unknown provider: {}. Supported: {}",
                self.llm.provider,
                KNOWN_PROVIDERS.join(", ")
            )));
        }

        if self.chunking.chunk_size == 0 {
            return Err(AppError::Config("chunkSize must be positive".to_string()));
        }

        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(AppError::Config(format!(
                "chunkOverlap ({}) must be smaller than chunkSize ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }

        let coalesce = &self.chunking.coalesce;
        if coalesce.min_chars > coalesce.max_chars || coalesce.min_words > coalesce.max_words {
            return Err(AppError::Config(
                "coalesce minimums must not exceed maximums".to_string(),
            ));
        }

        if self.retrieval.max_chunks == 0 {
            return Err(AppError::Config("maxChunks must be positive".to_string()));
        }

        Ok(())
    }
}
