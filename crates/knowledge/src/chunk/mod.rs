//! Document chunking.
//!
//! Raw extracted text flows through three pure stages:
//! - [`splitters`]: recursive, separator-prioritized splitting with overlap
//! - [`enrich`]: per-chunk statistics, content classification, keywords
//! - [`coalesce`]: merging undersized neighbours and slicing overlong chunks
//!
//! [`ChunkPipeline`] runs them in order for one document.

pub mod coalesce;
pub mod enrich;
mod pipeline;
pub mod splitters;

pub use coalesce::ChunkCoalescer;
pub use enrich::{derive_metadata, ChunkEnricher, ContentType};
pub use pipeline::ChunkPipeline;
pub use splitters::{ChunkSplitter, MarkdownSplitter, RecursiveSplitter, SplitterKind};

use serde::{Deserialize, Serialize};

/// Chunk and file metadata: string keys to JSON values.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A bounded slice of a document's text with positional and derived metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Trimmed chunk text
    pub content: String,

    /// Position within the source document (0-indexed)
    pub chunk_index: usize,

    /// Length of `content` in characters
    pub content_length: usize,

    /// Target size the splitter ran with
    pub chunk_size: usize,

    /// Overlap the splitter ran with
    pub chunk_overlap: usize,

    /// File-level metadata merged with derived chunk metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl Chunk {
    /// Create a chunk, deriving `content_length` from `content`.
    pub fn new(
        content: String,
        chunk_index: usize,
        chunk_size: usize,
        chunk_overlap: usize,
        metadata: Metadata,
    ) -> Self {
        let content_length = char_len(&content);
        Self {
            content,
            chunk_index,
            content_length,
            chunk_size,
            chunk_overlap,
            metadata,
        }
    }

    /// Word count recorded by the enricher, if any.
    pub fn recorded_word_count(&self) -> Option<usize> {
        self.metadata
            .get("word_count")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
    }

    /// Metadata value as a string slice.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// Length in characters. All size limits in this crate count characters, not bytes.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// The last `n` characters of `text` (all of it when shorter).
pub(crate) fn char_suffix(text: &str, n: usize) -> &str {
    let len = char_len(text);
    if n >= len {
        return text;
    }
    match text.char_indices().nth(len - n) {
        Some((offset, _)) => &text[offset..],
        None => "",
    }
}

/// Split `text` into consecutive pieces of at most `width` characters.
pub(crate) fn char_slices(text: &str, width: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(width.max(1))
        .map(|piece| piece.iter().collect())
        .collect()
}
