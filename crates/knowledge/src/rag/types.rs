//! RAG request, result and event types.

use crate::chunk::Metadata;
use kbase_llm::LlmUsage;
use serde::{Deserialize, Serialize};

/// A chunk returned by retrieval, normalized from a raw index hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub content: String,

    /// File the chunk came from, when known
    pub source_file: Option<String>,

    pub file_type: Option<String>,

    /// Chunk or record id
    pub id: Option<String>,

    /// `1 / (1 + distance)`; higher is more relevant
    pub score: Option<f64>,

    #[serde(default)]
    pub metadata: Metadata,

    pub file_id: Option<String>,

    pub vector_id: Option<String>,
}

impl RetrievedChunk {
    /// A chunk with only content and source, as built by callers and tests.
    pub fn new(content: impl Into<String>, source_file: Option<&str>) -> Self {
        Self {
            content: content.into(),
            source_file: source_file.map(str::to_string),
            file_type: None,
            id: None,
            score: None,
            metadata: Metadata::new(),
            file_id: None,
            vector_id: None,
        }
    }
}

/// A citation shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub file_name: String,
    pub file_type: Option<String>,
    pub chunk_id: Option<String>,
    pub relevance_score: Option<f64>,
}

/// Batch answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerResult {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub usage: Option<LlmUsage>,
    pub model: Option<String>,

    /// Number of chunks rendered into the prompt
    pub context_chunks: usize,
}

/// One event of a streamed answer.
///
/// A stream is `start?`, zero or more `content`, then exactly one of `end`
/// or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerEvent {
    Start {
        conversation_id: String,
    },
    Content {
        content: String,
    },
    End {
        answer: String,
        sources: Vec<SourceRef>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        source_files: Vec<String>,
        context_chunks: usize,
    },
    Error {
        message: String,
    },
}

impl AnswerEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End { .. } | Self::Error { .. })
    }

    /// Server-sent event framing: `data: <json>\n\n`.
    pub fn to_sse(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({
                "type": "error",
                "message": format!("event serialization failed: {}", e),
            })
            .to_string()
        });
        format!("data: {}\n\n", json)
    }
}

/// A question addressed to one knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub question: String,

    /// External session id; a new conversation is created when absent or unknown
    #[serde(default)]
    pub session_id: Option<String>,

    pub knowledge_base_id: String,

    #[serde(default)]
    pub stream: bool,

    #[serde(default)]
    pub system_prompt: Option<String>,

    #[serde(default)]
    pub temperature: Option<f32>,
}

impl ChatTurn {
    pub fn new(knowledge_base_id: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            session_id: None,
            knowledge_base_id: knowledge_base_id.into(),
            stream: false,
            system_prompt: None,
            temperature: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Reply to a batch [`ChatTurn`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub conversation_id: String,
    pub message_id: String,
    pub usage: Option<LlmUsage>,
    pub retrieved_chunks: usize,
    pub source_files: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let start = AnswerEvent::Start {
            conversation_id: "c1".to_string(),
        };
        assert_eq!(
            start.to_sse(),
            "data: {\"type\":\"start\",\"conversation_id\":\"c1\"}\n\n"
        );

        let content = AnswerEvent::Content {
            content: "你好".to_string(),
        };
        assert_eq!(
            content.to_sse(),
            "data: {\"type\":\"content\",\"content\":\"你好\"}\n\n"
        );
        assert!(!content.is_terminal());
    }

    #[test]
    fn test_end_event_omits_empty_source_files() {
        let end = AnswerEvent::End {
            answer: "a".to_string(),
            sources: vec![],
            source_files: vec![],
            context_chunks: 0,
        };
        let json: serde_json::Value = serde_json::to_value(&end).unwrap();
        assert_eq!(json["type"], "end");
        assert!(json.get("source_files").is_none());
        assert!(end.is_terminal());
    }

    #[test]
    fn test_error_event_frame_is_valid_json() {
        let error = AnswerEvent::Error {
            message: "bad \"quote\"\nand newline".to_string(),
        };
        let frame = error.to_sse();
        let body = frame
            .strip_prefix("data: ")
            .and_then(|f| f.strip_suffix("\n\n"))
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "bad \"quote\"\nand newline");
    }

    #[test]
    fn test_chat_turn_defaults() {
        let turn: ChatTurn =
            serde_json::from_str(r#"{"question":"q","knowledge_base_id":"docs"}"#).unwrap();
        assert_eq!(turn, ChatTurn::new("docs", "q"));
    }
}
