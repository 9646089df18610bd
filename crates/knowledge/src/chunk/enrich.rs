//! Per-chunk metadata: statistics, content classification and keywords.

use super::{char_len, Chunk, Metadata};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Maximum number of keywords kept per chunk.
pub const MAX_KEYWORDS: usize = 5;

static NUMBERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+[.)、]").expect("numbered item pattern"));

static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("non-word pattern"));

const BULLETS: &[char] = &['•', '●', '○', '▪', '▫', '-', '*', '+'];

const CODE_MARKERS: &[&str] = &[
    "```", "def ", "function ", "class ", "import ", "from ", "<?", "?>",
];

const STOP_WORDS: &[&str] = &[
    "的", "是", "在", "有", "和", "与", "或", "但", "而", "了", "也", "都", "还", "就", "the", "a",
    "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "is", "are",
    "was", "were", "be", "been", "being", "have", "has", "had", "do", "does", "did", "will",
    "would", "could", "should",
];

/// Coarse classification of a chunk's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Table,
    List,
    Code,
    Text,
}

impl ContentType {
    /// Classify text; table, then list, then code, else text.
    pub fn detect(text: &str) -> Self {
        if is_table(text) {
            Self::Table
        } else if is_list(text) {
            Self::List
        } else if is_code(text) {
            Self::Code
        } else {
            Self::Text
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::List => "list",
            Self::Code => "code",
            Self::Text => "text",
        }
    }
}

fn is_table(text: &str) -> bool {
    text.matches('|').count() > 2
}

fn is_list(text: &str) -> bool {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if lines.is_empty() {
        return false;
    }

    let list_lines = lines
        .iter()
        .filter(|line| line.starts_with(BULLETS) || NUMBERED_ITEM.is_match(line))
        .count();

    list_lines as f64 / lines.len() as f64 > 0.3
}

fn is_code(text: &str) -> bool {
    CODE_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Up to [`MAX_KEYWORDS`] most frequent tokens; ties keep first-seen order.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let cleaned = NON_WORD.replace_all(&lowered, " ");

    let mut counts: Vec<(&str, usize)> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();

    for word in cleaned.split_whitespace() {
        if char_len(word) <= 2 || STOP_WORDS.contains(&word) {
            continue;
        }
        match positions.get(word) {
            Some(&index) => counts[index].1 += 1,
            None => {
                positions.insert(word, counts.len());
                counts.push((word, 1));
            }
        }
    }

    // Stable sort keeps first-seen order among equal counts.
    counts.sort_by(|a, b| b.1.cmp(&a.1));

    counts
        .into_iter()
        .take(MAX_KEYWORDS)
        .map(|(word, _)| word.to_string())
        .collect()
}

/// SHA-256 hex digest of the text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Metadata derived from the text alone.
///
/// Keys: `word_count`, `char_count`, `line_count`, `content_type`,
/// `keywords` (only when non-empty) and `content_hash`.
pub fn derive_metadata(text: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("word_count".into(), text.split_whitespace().count().into());
    metadata.insert("char_count".into(), char_len(text).into());
    metadata.insert("line_count".into(), text.lines().count().into());
    metadata.insert(
        "content_type".into(),
        ContentType::detect(text).as_str().into(),
    );

    let keywords = extract_keywords(text);
    if !keywords.is_empty() {
        metadata.insert("keywords".into(), keywords.into());
    }

    metadata.insert("content_hash".into(), content_hash(text).into());
    metadata
}

/// Replace the derived keys of `metadata` with values for `text`.
pub(crate) fn refresh_derived(metadata: &mut Metadata, text: &str) {
    metadata.remove("keywords");
    metadata.extend(derive_metadata(text));
}

/// Builds [`Chunk`]s from split text and file-level metadata.
#[derive(Debug, Clone)]
pub struct ChunkEnricher {
    chunk_method: String,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl ChunkEnricher {
    pub fn new(chunk_method: impl Into<String>, chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_method: chunk_method.into(),
            chunk_size,
            chunk_overlap,
        }
    }

    /// Enrich one piece of text at `position` (0-indexed) out of `total_chunks`.
    ///
    /// File metadata is the base layer; the chunking keys (`source_file`,
    /// `file_type`, `processor_type`, `chunk_method`, `total_chunks`,
    /// `chunk_position`) go on top, and derived keys win over both.
    pub fn enrich(
        &self,
        text: &str,
        position: usize,
        total_chunks: usize,
        file_metadata: &Metadata,
    ) -> Chunk {
        let mut metadata = file_metadata.clone();

        metadata.insert(
            "source_file".into(),
            file_metadata
                .get("original_filename")
                .cloned()
                .unwrap_or(Value::Null),
        );
        for key in ["file_type", "processor_type"] {
            metadata.insert(
                key.into(),
                file_metadata.get(key).cloned().unwrap_or(Value::Null),
            );
        }
        metadata.insert("chunk_method".into(), self.chunk_method.clone().into());
        metadata.insert("total_chunks".into(), total_chunks.into());
        metadata.insert("chunk_position".into(), (position + 1).into());

        metadata.extend(derive_metadata(text));

        Chunk::new(
            text.to_string(),
            position,
            self.chunk_size,
            self.chunk_overlap,
            metadata,
        )
    }

    /// Enrich every non-blank piece, in order.
    pub fn enrich_all(&self, pieces: &[String], file_metadata: &Metadata) -> Vec<Chunk> {
        let total = pieces.len();
        pieces
            .iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(position, text)| self.enrich(text, position, total, file_metadata))
            .collect()
    }
}
