//! Chunking pipeline orchestrator.

use super::{Chunk, ChunkCoalescer, ChunkEnricher, Metadata, SplitterKind};
use kbase_core::{ChunkingSettings, CoalesceSettings};

/// Splitter, enricher and coalescer run in order for one document.
#[derive(Debug, Clone)]
pub struct ChunkPipeline {
    splitter: SplitterKind,
    chunk_size: usize,
    chunk_overlap: usize,
    coalescer: ChunkCoalescer,
}

impl Default for ChunkPipeline {
    fn default() -> Self {
        Self::new(&ChunkingSettings::default(), SplitterKind::default())
    }
}

impl ChunkPipeline {
    /// Create a pipeline from chunking settings and the preferred splitter.
    pub fn new(settings: &ChunkingSettings, splitter: SplitterKind) -> Self {
        Self {
            splitter,
            chunk_size: settings.chunk_size,
            chunk_overlap: settings.chunk_overlap,
            coalescer: ChunkCoalescer::new(settings.coalesce),
        }
    }

    /// Override the coalescing bounds.
    pub fn with_coalesce(mut self, bounds: CoalesceSettings) -> Self {
        self.coalescer = ChunkCoalescer::new(bounds);
        self
    }

    /// Splitter used for a document with this file metadata.
    ///
    /// Markdown files and extractor output flagged as Markdown always use the
    /// heading-aware splitter.
    pub fn splitter_for(&self, file_metadata: &Metadata) -> SplitterKind {
        let is_markdown = |key: &str| {
            file_metadata
                .get(key)
                .and_then(|v| v.as_str())
                .is_some_and(|v| matches!(v.to_lowercase().as_str(), "md" | "markdown"))
        };

        if is_markdown("file_type") || is_markdown("content_format") {
            SplitterKind::Markdown
        } else {
            self.splitter
        }
    }

    /// Turn extracted text into enriched, size-bounded chunks.
    pub fn process(&self, text: &str, file_metadata: &Metadata) -> Vec<Chunk> {
        let splitter = self
            .splitter_for(file_metadata)
            .build(self.chunk_size, self.chunk_overlap);
        let method = splitter.kind().as_str();
        let pieces = splitter.split(text);

        tracing::debug!(
            "Split {} chars into {} pieces with {} splitter",
            text.chars().count(),
            pieces.len(),
            method
        );

        let enricher = ChunkEnricher::new(method, self.chunk_size, self.chunk_overlap);
        let chunks = enricher.enrich_all(&pieces, file_metadata);
        let chunks = self.coalescer.run(chunks);

        tracing::info!(
            "Chunking complete: {} chunks from {} pieces",
            chunks.len(),
            pieces.len()
        );

        chunks
    }
}
