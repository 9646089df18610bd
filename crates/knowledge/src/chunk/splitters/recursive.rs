//! Recursive separator-prioritized splitter.
//!
//! Text is split on the highest-priority separator first. Pieces are packed
//! greedily into segments; a piece longer than `chunk_size` is split again
//! with the next separator and its segments are spliced in place. The empty
//! separator means fixed-width character windows.
//!
//! Every segment after the first is then prefixed with the tail of the
//! segment before it, across splice boundaries too. Segments that will
//! receive a prefix are packed to `chunk_size - chunk_overlap`, and the
//! prefix is clamped so a stitched chunk stays within `chunk_size`.

use super::{ChunkSplitter, SplitterKind};
use crate::chunk::{char_len, char_suffix};

/// Paragraph, line, CJK and ASCII sentence ends, clauses, space, characters.
pub const DEFAULT_SEPARATORS: &[&str] = &[
    "\n\n", "\n", "。", "！", "？", ".", "!", "?", ";", ",", " ", "",
];

/// Recursive character splitter.
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveSplitter {
    /// Splitter with the default separator list.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self::with_separators(chunk_size, chunk_overlap, DEFAULT_SEPARATORS)
    }

    /// Splitter with a custom separator list, highest priority first.
    pub fn with_separators<S: AsRef<str>>(
        chunk_size: usize,
        chunk_overlap: usize,
        separators: &[S],
    ) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap,
            separators: separators.iter().map(|s| s.as_ref().to_string()).collect(),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into chunks of at most `chunk_size` characters.
    ///
    /// Text that already fits is returned unchanged as a single chunk.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }

        let length = char_len(text);
        if length <= self.chunk_size {
            return vec![text.to_string()];
        }

        let mut segments = Vec::new();
        self.collect(text, 0, &mut segments);
        let chunks = self.stitch(&segments);

        tracing::debug!(
            "Split {} chars into {} chunks (size={}, overlap={})",
            length,
            chunks.len(),
            self.chunk_size,
            self.chunk_overlap
        );

        chunks
    }

    /// Append the trimmed, un-overlapped segments of `text` to `segments`.
    fn collect(&self, text: &str, level: usize, segments: &mut Vec<String>) {
        let separator = match self.separators.get(level) {
            Some(separator) if !separator.is_empty() => separator.as_str(),
            _ => return self.split_chars(text, segments),
        };
        let separator_len = char_len(separator);

        let mut buffer = String::new();
        let mut buffer_len = 0;

        for piece in text.split(separator) {
            let piece_len = char_len(piece);

            if piece_len > self.chunk_size {
                flush(segments, &mut buffer);
                buffer_len = 0;
                self.collect(piece, level + 1, segments);
                continue;
            }

            if buffer.is_empty() {
                buffer.push_str(piece);
                buffer_len = piece_len;
            } else if buffer_len + separator_len + piece_len <= self.budget(segments) {
                buffer.push_str(separator);
                buffer.push_str(piece);
                buffer_len += separator_len + piece_len;
            } else {
                flush(segments, &mut buffer);
                buffer.push_str(piece);
                buffer_len = piece_len;
            }
        }
        flush(segments, &mut buffer);
    }

    /// Packing budget for the segment that follows `segments`.
    fn budget(&self, segments: &[String]) -> usize {
        if segments.is_empty() || self.chunk_overlap == 0 {
            self.chunk_size
        } else {
            self.chunk_size.saturating_sub(self.chunk_overlap).max(1)
        }
    }

    /// Prefix every segment after the first with the tail of its predecessor.
    fn stitch(&self, segments: &[String]) -> Vec<String> {
        segments
            .iter()
            .enumerate()
            .map(|(i, segment)| {
                if i == 0 || self.chunk_overlap == 0 {
                    return segment.clone();
                }
                let room = self.chunk_size.saturating_sub(char_len(segment));
                let prefix = char_suffix(&segments[i - 1], self.chunk_overlap.min(room));
                format!("{}{}", prefix.trim_start(), segment)
            })
            .collect()
    }

    /// Consecutive character windows, each as wide as the current budget.
    fn split_chars(&self, text: &str, segments: &mut Vec<String>) {
        let chars: Vec<char> = text.chars().collect();

        let mut start = 0;
        while start < chars.len() {
            let end = (start + self.budget(segments)).min(chars.len());
            let window: String = chars[start..end].iter().collect();
            let window = window.trim();
            if !window.is_empty() {
                segments.push(window.to_string());
            }
            start = end;
        }
    }
}

fn flush(segments: &mut Vec<String>, buffer: &mut String) {
    let segment = buffer.trim();
    if !segment.is_empty() {
        segments.push(segment.to_string());
    }
    buffer.clear();
}

impl ChunkSplitter for RecursiveSplitter {
    fn split(&self, text: &str) -> Vec<String> {
        self.split_text(text)
    }

    fn kind(&self) -> SplitterKind {
        SplitterKind::Recursive
    }
}

/// Split `text` with the given (or default) separators.
pub fn split_text(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Option<&[&str]>,
) -> Vec<String> {
    let separators = separators.unwrap_or(DEFAULT_SEPARATORS);
    RecursiveSplitter::with_separators(chunk_size, chunk_overlap, separators).split_text(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_short_text_returned_unchanged() {
        let text = "  Fifty characters of text, give or take a few.\n";
        assert!(char_len(text) <= 50);

        let chunks = split_text(text, 1000, 200, None);
        assert_eq!(chunks, vec![text.to_string()]);
    }

    #[test]
    fn test_empty_text() {
        assert!(split_text("", 1000, 200, None).is_empty());
    }

    #[test]
    fn test_sentence_split_with_overlap() {
        let text: String = "A. B. C. D. ".repeat(300).chars().take(2500).collect();

        let chunks = split_text(&text, 1000, 100, None);

        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(char_len(chunk) <= 1000);
        }
        assert!(chunks[1].starts_with(char_suffix(&chunks[0], 100).trim_start()));
        assert!(chunks[2].starts_with(char_suffix(&chunks[1], 100).trim_start()));
    }

    #[test]
    fn test_paragraphs_packed_greedily() {
        let text = format!("{}\n\n{}\n\n{}", "a".repeat(40), "b".repeat(40), "c".repeat(40));

        let chunks = split_text(&text, 100, 0, None);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], format!("{}\n\n{}", "a".repeat(40), "b".repeat(40)));
        assert_eq!(chunks[1], "c".repeat(40));
    }

    #[test]
    fn test_overlap_crosses_splice_boundaries() {
        // The middle paragraph is too long and is split at the space level.
        let long_paragraph = "word ".repeat(30);
        let text = format!("intro\n\n{}\n\noutro", long_paragraph.trim());

        let chunks = split_text(&text, 60, 10, None);

        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0], "intro");
        assert!(chunks[1].starts_with("introword word"));
        for pair in chunks.windows(2) {
            assert!(pair[1].starts_with(char_suffix(&pair[0], 10).trim_start()));
        }
        assert_eq!(chunks[4], "word wordoutro");
        for chunk in &chunks {
            assert!(char_len(chunk) <= 60);
            assert_eq!(chunk.trim(), chunk.as_str());
        }
    }

    #[test]
    fn test_cjk_sentences() {
        let text = "知识库用于存储文档。".repeat(30);

        let chunks = split_text(&text, 50, 0, None);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(char_len(chunk) <= 50);
            assert!(!chunk.is_empty());
        }
    }

    #[test]
    fn test_character_fallback_windows() {
        let text = "a".repeat(250);

        let chunks = split_text(&text, 100, 20, None);

        let lengths: Vec<usize> = chunks.iter().map(|c| char_len(c)).collect();
        assert_eq!(lengths, vec![100, 100, 90]);
    }

    #[test]
    fn test_custom_separators_without_fallback() {
        let text = "x".repeat(30);
        let chunks = split_text(&text, 10, 0, Some(&["|"]));
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_overlap_clamped_to_chunk_size() {
        // Each paragraph fits alone but not with a full prefix.
        let text = format!("{}\n\n{}", "a".repeat(95), "b".repeat(95));

        let chunks = split_text(&text, 100, 20, None);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1], format!("{}{}", "a".repeat(5), "b".repeat(95)));
    }

    fn word_text() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-z]{1,8}", 1..200).prop_map(|words| words.join(" "))
    }

    fn mixed_text() -> impl Strategy<Value = String> {
        prop::collection::vec(
            prop_oneof![
                "[a-z]{1,12}",
                Just(" ".to_string()),
                Just("\n".to_string()),
                Just("\n\n".to_string()),
                Just(". ".to_string()),
                Just("。".to_string()),
                Just("知识".to_string()),
            ],
            0..300,
        )
        .prop_map(|parts| parts.concat())
    }

    fn single_separator_text() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-z]{1,8}", 1..120).prop_map(|words| words.join(" "))
    }

    proptest! {
        #[test]
        fn chunks_never_exceed_chunk_size(
            text in mixed_text(),
            chunk_size in 10usize..200,
            overlap_pct in 0usize..50,
        ) {
            let overlap = chunk_size * overlap_pct / 100;
            for chunk in split_text(&text, chunk_size, overlap, None) {
                prop_assert!(char_len(&chunk) <= chunk_size);
                prop_assert!(!chunk.is_empty());
            }
        }

        #[test]
        fn split_chunks_are_trimmed(
            text in mixed_text(),
            chunk_size in 10usize..200,
            overlap_pct in 0usize..50,
        ) {
            prop_assume!(char_len(&text) > chunk_size);
            let overlap = chunk_size * overlap_pct / 100;
            for chunk in split_text(&text, chunk_size, overlap, None) {
                prop_assert_eq!(chunk.trim(), chunk.as_str());
            }
        }

        #[test]
        fn consecutive_chunks_share_overlap(
            text in word_text(),
            chunk_size in 60usize..120,
            overlap in 1usize..20,
        ) {
            let chunks = split_text(&text, chunk_size, overlap, None);
            for pair in chunks.windows(2) {
                let previous = &pair[0];
                let expected = char_suffix(previous, overlap.min(char_len(previous)));
                prop_assert!(pair[1].starts_with(expected.trim_start()));
            }
        }

        #[test]
        fn chunks_cover_text_without_overlap(
            text in single_separator_text(),
            chunk_size in 10usize..80,
        ) {
            let chunks = split_text(&text, chunk_size, 0, None);
            prop_assert_eq!(chunks.join(" "), text.trim());
        }
    }
}
