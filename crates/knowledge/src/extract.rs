//! Upload validation and text extraction.
//!
//! Binary office formats are handled by external parsers; this module only
//! decides what is accepted and turns text formats into cleaned text plus
//! the file-level metadata the chunker expects.

use crate::chunk::Metadata;
use kbase_core::{AppError, AppResult, UploadSettings};
use regex::Regex;
use serde_json::json;
use std::path::Path;
use std::sync::{Arc, LazyLock};

/// Extensions accepted for upload.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "md", "markdown", "csv", "json",
    "html", "htm", "jpg", "jpeg", "png", "gif",
];

static BLANK_LINE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n\s*\n").expect("blank line pattern"));

static HORIZONTAL_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("horizontal space pattern"));

static LINE_EDGES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]+|[ \t]+$").expect("line edge pattern"));

static CONTROL_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\x00-\x08\x0b\x0c\x0e-\x1f\x7f-\u{9f}]").expect("control char pattern")
});

static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>")
        .expect("script/style pattern")
});

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("html tag pattern"));

/// Lower-cased extension of `filename`, without the dot.
pub fn file_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// MIME type assumed for an extension when the client sends none.
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    let mime = match extension {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "txt" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        "html" | "htm" => "text/html",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        _ => return None,
    };
    Some(mime)
}

/// Reject uploads before any processing starts.
///
/// Returns the effective MIME type. Text files whose reported MIME type is
/// not on the allow-list fall back to the type implied by their extension.
pub fn validate_upload(
    filename: &str,
    mime_type: Option<&str>,
    size: u64,
    limits: &UploadSettings,
) -> AppResult<String> {
    let extension = file_extension(filename)
        .ok_or_else(|| AppError::Input(format!("File has no extension: {}", filename)))?;

    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(AppError::Input(format!(
            "Unsupported file type: .{}",
            extension
        )));
    }

    if size > limits.max_file_size {
        return Err(AppError::Input(format!(
            "File too large: {} bytes (limit {})",
            size, limits.max_file_size
        )));
    }

    let allowed = |mime: &str| limits.allowed_mime_types.iter().any(|m| m == mime);

    let mut effective = mime_type
        .filter(|m| !m.is_empty())
        .or_else(|| mime_for_extension(&extension))
        .unwrap_or_default()
        .to_string();

    if !allowed(&effective) {
        if let Some(fallback) = mime_for_extension(&extension).filter(|m| m.starts_with("text/")) {
            effective = fallback.to_string();
        }
    }

    if !allowed(&effective) {
        return Err(AppError::Input(format!(
            "Unsupported MIME type: {}",
            effective
        )));
    }

    Ok(effective)
}

/// Normalize whitespace and strip control characters.
pub fn clean_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let text = text.replace(['\u{3000}', '\u{a0}'], " ");
    let text = HORIZONTAL_SPACE.replace_all(&text, " ");
    let text = LINE_EDGES.replace_all(&text, "");
    let text = BLANK_LINE_RUN.replace_all(&text, "\n\n");
    let text = CONTROL_CHARS.replace_all(&text, "");
    text.trim().to_string()
}

/// Visible text of an HTML document.
fn strip_html(html: &str) -> String {
    let text = SCRIPT_OR_STYLE.replace_all(html, "");
    let text = HTML_TAG.replace_all(&text, "\n");
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Extractor output: the text and how it is structured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractedContent {
    PlainText(String),
    Markdown(String),
}

impl ExtractedContent {
    pub fn text(&self) -> &str {
        match self {
            Self::PlainText(text) | Self::Markdown(text) => text,
        }
    }

    pub fn format(&self) -> &'static str {
        match self {
            Self::PlainText(_) => "plain",
            Self::Markdown(_) => "markdown",
        }
    }

    fn map(self, f: impl FnOnce(String) -> String) -> Self {
        match self {
            Self::PlainText(text) => Self::PlainText(f(text)),
            Self::Markdown(text) => Self::Markdown(f(text)),
        }
    }
}

/// Cleaned document text plus file-level metadata.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub content: ExtractedContent,
    pub metadata: Metadata,
}

/// Turns raw file bytes into text.
#[async_trait::async_trait]
pub trait DocumentExtractor: Send + Sync {
    /// Name recorded as `processor_type` on every chunk.
    fn processor_type(&self) -> &str;

    /// Whether this extractor handles the extension.
    fn supports(&self, extension: &str) -> bool;

    async fn extract(
        &self,
        bytes: &[u8],
        filename: &str,
        mime_type: &str,
    ) -> AppResult<ExtractedDocument>;
}

/// UTF-8 text formats: txt, md, csv, json, html.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

#[async_trait::async_trait]
impl DocumentExtractor for PlainTextExtractor {
    fn processor_type(&self) -> &str {
        "plain_text"
    }

    fn supports(&self, extension: &str) -> bool {
        matches!(
            extension,
            "txt" | "md" | "markdown" | "csv" | "json" | "html" | "htm"
        )
    }

    async fn extract(
        &self,
        bytes: &[u8],
        filename: &str,
        _mime_type: &str,
    ) -> AppResult<ExtractedDocument> {
        let text = std::str::from_utf8(bytes).map_err(|e| {
            AppError::Extraction(format!("{} is not valid UTF-8: {}", filename, e))
        })?;

        let extension = file_extension(filename).unwrap_or_default();
        let content = match extension.as_str() {
            "md" | "markdown" => ExtractedContent::Markdown(text.to_string()),
            "html" | "htm" => ExtractedContent::PlainText(strip_html(text)),
            _ => ExtractedContent::PlainText(text.to_string()),
        };

        let mut metadata = Metadata::new();
        metadata.insert("text_length".into(), content.text().chars().count().into());
        metadata.insert("line_count".into(), content.text().lines().count().into());

        Ok(ExtractedDocument { content, metadata })
    }
}

/// Extractors by file extension.
#[derive(Clone)]
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn DocumentExtractor>>,
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self {
            extractors: vec![Arc::new(PlainTextExtractor)],
        }
    }
}

impl ExtractorRegistry {
    /// Registry with no extractors.
    pub fn empty() -> Self {
        Self {
            extractors: Vec::new(),
        }
    }

    /// Add an extractor; later registrations win for shared extensions.
    pub fn register(mut self, extractor: Arc<dyn DocumentExtractor>) -> Self {
        self.extractors.insert(0, extractor);
        self
    }

    pub fn resolve(&self, extension: &str) -> Option<&Arc<dyn DocumentExtractor>> {
        self.extractors.iter().find(|e| e.supports(extension))
    }

    /// Extract and clean a file, adding the metadata the chunker records.
    ///
    /// Keys added: `original_filename`, `file_type`, `mime_type`,
    /// `processor_type`, `content_format` and `cleaned_text_length`.
    pub async fn extract(
        &self,
        bytes: &[u8],
        filename: &str,
        mime_type: &str,
    ) -> AppResult<ExtractedDocument> {
        let extension = file_extension(filename).unwrap_or_default();
        let extractor = self.resolve(&extension).ok_or_else(|| {
            AppError::Input(format!("No extractor available for .{} files", extension))
        })?;

        let document = extractor.extract(bytes, filename, mime_type).await?;
        let content = document.content.map(|text| clean_text(&text));

        let mut metadata = document.metadata;
        metadata.insert("original_filename".into(), json!(filename));
        metadata.insert("file_type".into(), json!(extension));
        metadata.insert("mime_type".into(), json!(mime_type));
        metadata.insert("processor_type".into(), json!(extractor.processor_type()));
        metadata.insert("content_format".into(), json!(content.format()));
        metadata.insert(
            "cleaned_text_length".into(),
            content.text().chars().count().into(),
        );

        tracing::debug!(
            "Extracted {} chars from {} with {}",
            content.text().chars().count(),
            filename,
            extractor.processor_type()
        );

        Ok(ExtractedDocument { content, metadata })
    }
}
