//! Text splitter implementations.

mod markdown;
mod recursive;

pub use markdown::{MarkdownSplitter, MARKDOWN_SEPARATORS};
pub use recursive::{split_text, RecursiveSplitter, DEFAULT_SEPARATORS};

use serde::{Deserialize, Serialize};

/// Trait for chunk splitters.
pub trait ChunkSplitter: Send + Sync {
    /// Split text into ordered, size-bounded pieces.
    fn split(&self, text: &str) -> Vec<String>;

    /// Which splitter produced the pieces.
    fn kind(&self) -> SplitterKind;
}

/// Splitter selection, recorded on every chunk as `chunk_method`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitterKind {
    #[default]
    Recursive,
    Markdown,
}

impl SplitterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recursive => "recursive",
            Self::Markdown => "markdown",
        }
    }

    /// Build the splitter for this kind.
    pub fn build(&self, chunk_size: usize, chunk_overlap: usize) -> Box<dyn ChunkSplitter> {
        match self {
            Self::Recursive => Box::new(RecursiveSplitter::new(chunk_size, chunk_overlap)),
            Self::Markdown => Box::new(MarkdownSplitter::new(chunk_size, chunk_overlap)),
        }
    }
}

impl std::str::FromStr for SplitterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "recursive" => Ok(Self::Recursive),
            "markdown" | "md" => Ok(Self::Markdown),
            other => Err(format!("Unknown splitter: {}", other)),
        }
    }
}
