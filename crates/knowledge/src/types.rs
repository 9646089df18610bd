//! Knowledge system type definitions.

use crate::chunk::SplitterKind;
use chrono::{DateTime, Utc};
use kbase_core::{AppConfig, ChunkingSettings, CoalesceSettings};
use serde::{Deserialize, Serialize};

/// Configuration for a knowledge base, stored at `.kbase/knowledge/<base>/config.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBaseConfig {
    /// Name of the knowledge base
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Vector index collection holding this base's chunks
    pub collection_name: String,

    /// Splitter used for non-Markdown documents
    #[serde(default)]
    pub splitter: SplitterKind,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Embedding model the index was built with
    pub embedding_model: String,

    /// Embedding vector dimension
    pub embedding_dimensions: usize,

    pub created_at: DateTime<Utc>,
}

fn default_chunk_size() -> usize {
    ChunkingSettings::default().chunk_size
}

fn default_chunk_overlap() -> usize {
    ChunkingSettings::default().chunk_overlap
}

impl KnowledgeBaseConfig {
    /// Config for a new base, taking chunking and embedding defaults from the app config.
    pub fn new(name: &str, app: &AppConfig) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            collection_name: collection_name_for(name),
            splitter: SplitterKind::default(),
            chunk_size: app.chunking.chunk_size,
            chunk_overlap: app.chunking.chunk_overlap,
            embedding_model: app.llm.embedding_model.clone(),
            embedding_dimensions: app.llm.embedding_dimensions,
            created_at: Utc::now(),
        }
    }

    /// Chunking settings for this base with the given coalescing bounds.
    pub fn chunking(&self, coalesce: CoalesceSettings) -> ChunkingSettings {
        ChunkingSettings {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            coalesce,
        }
    }
}

/// Collection name for a base: `kb_` plus the name with anything outside
/// `[A-Za-z0-9_-]` replaced by `_`.
pub fn collection_name_for(base_name: &str) -> String {
    let cleaned: String = base_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("kb_{}", cleaned)
}

/// Lifecycle of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Outcome of ingesting one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub file_id: String,

    pub filename: String,

    pub status: ProcessingStatus,

    /// Chunks written to the vector index
    pub chunk_count: usize,

    /// Characters of cleaned text handed to the chunker
    pub text_length: usize,

    /// Failure reason when `status` is `Failed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub duration_secs: f64,
}
