//! Merging undersized neighbours and slicing overlong chunks.
//!
//! Embedding services reject very long inputs and produce poor vectors for
//! fragments, so chunks are brought into a `[floor, ceiling]` window before
//! indexing. Both bounds count characters and words.

use super::enrich::refresh_derived;
use super::{char_len, char_slices, Chunk, Metadata};
use kbase_core::CoalesceSettings;
use serde_json::{json, Value};

/// Rough word count for text without a recorded `word_count`.
///
/// Whitespace-separated text counts tokens; text without spaces (CJK) counts
/// two characters per word.
pub fn estimate_words(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    if text.contains(' ') {
        text.split_whitespace().count().max(1)
    } else {
        (char_len(text) / 2).max(1)
    }
}

/// Brings chunk sizes into the configured window.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkCoalescer {
    settings: CoalesceSettings,
}

/// Members collected for the next merged chunk.
#[derive(Default)]
struct Buffer {
    texts: Vec<String>,
    first: Option<Chunk>,
    end_index: usize,
    /// Sum of member lengths, used for the floor
    chars: usize,
    /// Length of the members joined with newlines, used for the ceiling
    joined_chars: usize,
    words: usize,
}

impl Buffer {
    fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    fn push(&mut self, chunk: Chunk, text: String, words: usize) {
        let len = char_len(&text);
        self.joined_chars += if self.is_empty() { len } else { len + 1 };
        self.chars += len;
        self.words += words;
        self.end_index = chunk.chunk_index;
        self.texts.push(text);
        if self.first.is_none() {
            self.first = Some(chunk);
        }
    }

    fn take(&mut self) -> Option<Chunk> {
        let buffer = std::mem::take(self);
        let first = buffer.first?;

        let content = buffer.texts.join("\n").trim().to_string();
        let mut metadata: Metadata = first.metadata;
        metadata.insert(
            "chunk_index_range".into(),
            json!([first.chunk_index, buffer.end_index]),
        );
        metadata.insert("coalesced".into(), Value::Bool(true));
        refresh_derived(&mut metadata, &content);

        Some(Chunk::new(
            content,
            first.chunk_index,
            first.chunk_size,
            first.chunk_overlap,
            metadata,
        ))
    }
}

impl ChunkCoalescer {
    pub fn new(settings: CoalesceSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CoalesceSettings {
        &self.settings
    }

    /// Merge adjacent chunks until each reaches the floor, never crossing the ceiling.
    ///
    /// A chunk that would push the buffer over `max_chars` or `max_words`
    /// flushes the buffer first and starts a new one. A buffer is flushed as
    /// soon as both its character and word totals exceed the floor. Every
    /// output chunk carries `coalesced: true` and the `chunk_index_range` of
    /// its members; single chunks longer than the ceiling pass through and
    /// are left to [`split_overlong`](Self::split_overlong).
    pub fn coalesce(&self, chunks: Vec<Chunk>) -> Vec<Chunk> {
        let s = &self.settings;
        let mut merged = Vec::new();
        let mut buffer = Buffer::default();

        for chunk in chunks {
            let text = chunk.content.trim().to_string();
            let words = chunk
                .recorded_word_count()
                .unwrap_or_else(|| estimate_words(&text));
            let len = char_len(&text);

            if !buffer.is_empty()
                && (buffer.joined_chars + 1 + len > s.max_chars || buffer.words + words > s.max_words)
            {
                merged.extend(buffer.take());
            }

            buffer.push(chunk, text, words);

            if buffer.chars > s.min_chars && buffer.words > s.min_words {
                merged.extend(buffer.take());
            }
        }

        merged.extend(buffer.take());
        tracing::debug!("Coalesced into {} chunks", merged.len());
        merged
    }

    /// Slice any chunk longer than `max_chars` into consecutive parts.
    ///
    /// Parts keep the parent's metadata plus `part_index` and
    /// `split_from_overlong: true`; derived keys are recomputed per part.
    pub fn split_overlong(&self, chunks: Vec<Chunk>) -> Vec<Chunk> {
        let max_chars = self.settings.max_chars.max(1);
        let mut result = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            if chunk.content_length <= max_chars {
                result.push(chunk);
                continue;
            }

            tracing::debug!(
                "Splitting overlong chunk {} ({} chars)",
                chunk.chunk_index,
                chunk.content_length
            );
            for (part, piece) in char_slices(&chunk.content, max_chars).into_iter().enumerate() {
                let mut metadata = chunk.metadata.clone();
                metadata.insert("part_index".into(), part.into());
                metadata.insert("split_from_overlong".into(), Value::Bool(true));
                refresh_derived(&mut metadata, &piece);
                result.push(Chunk::new(
                    piece,
                    chunk.chunk_index,
                    chunk.chunk_size,
                    chunk.chunk_overlap,
                    metadata,
                ));
            }
        }

        result
    }

    /// [`coalesce`](Self::coalesce) followed by [`split_overlong`](Self::split_overlong).
    pub fn run(&self, chunks: Vec<Chunk>) -> Vec<Chunk> {
        self.split_overlong(self.coalesce(chunks))
    }
}
