//! Markdown-aware splitter: headings first, then paragraphs and lines.

use super::{ChunkSplitter, RecursiveSplitter, SplitterKind};

pub const MARKDOWN_SEPARATORS: &[&str] = &[
    "\n## ", "\n### ", "\n#### ", "\n##### ", "\n\n", "\n", " ", "",
];

/// Recursive splitter over Markdown heading boundaries.
#[derive(Debug, Clone)]
pub struct MarkdownSplitter {
    inner: RecursiveSplitter,
}

impl MarkdownSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            inner: RecursiveSplitter::with_separators(chunk_size, chunk_overlap, MARKDOWN_SEPARATORS),
        }
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.inner.split_text(text)
    }
}

impl ChunkSplitter for MarkdownSplitter {
    fn split(&self, text: &str) -> Vec<String> {
        self.split_text(text)
    }

    fn kind(&self) -> SplitterKind {
        SplitterKind::Markdown
    }
}
