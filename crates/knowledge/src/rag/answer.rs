//! Grounded answer generation over retrieved chunks.
//!
//! The first [`MAX_CONTEXT_CHUNKS`] chunks, in the order given, are rendered
//! into the prompt; citations come from those same chunks.

use crate::rag::types::{AnswerEvent, AnswerResult, RetrievedChunk, SourceRef};
use futures::stream::{self, BoxStream, StreamExt};
use kbase_core::{AppError, AppResult};
use kbase_llm::{ChatMessage, LlmClient, LlmRequest, LlmStream};
use kbase_prompt::{build_rag_prompt, PromptDefinition};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Chunks rendered into one prompt.
pub const MAX_CONTEXT_CHUNKS: usize = 5;

const UNKNOWN_SOURCE: &str = "未知来源";

/// Lazy, single-consumer sequence of answer events.
pub type AnswerStream = BoxStream<'static, AnswerEvent>;

/// Render chunks as `[文档N] 来源: <source>` blocks separated by blank lines.
pub fn build_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .take(MAX_CONTEXT_CHUNKS)
        .enumerate()
        .map(|(i, chunk)| {
            format!(
                "[文档{}] 来源: {}\n{}",
                i + 1,
                chunk.source_file.as_deref().unwrap_or(UNKNOWN_SOURCE),
                chunk.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// One citation per distinct source file, first occurrence wins.
pub fn extract_sources(chunks: &[RetrievedChunk]) -> Vec<SourceRef> {
    let mut seen = HashSet::new();
    chunks
        .iter()
        .take(MAX_CONTEXT_CHUNKS)
        .filter_map(|chunk| {
            let file_name = chunk.source_file.as_ref()?;
            if !seen.insert(file_name.clone()) {
                return None;
            }
            Some(SourceRef {
                file_name: file_name.clone(),
                file_type: chunk.file_type.clone(),
                chunk_id: chunk.id.clone(),
                relevance_score: chunk.score,
            })
        })
        .collect()
}

/// Per-call generation options.
#[derive(Debug, Clone, Default)]
pub struct AnswerOptions {
    /// Replaces the prompt's system instruction
    pub system_prompt: Option<String>,

    /// Sampling temperature; the service default when `None`
    pub temperature: Option<f32>,
}

/// Answer orchestrator.
#[derive(Clone)]
pub struct RagService {
    llm: Arc<dyn LlmClient>,
    model: String,
    prompt: PromptDefinition,
    temperature: f32,
}

impl RagService {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
            prompt: PromptDefinition::default_rag(),
            temperature: 0.7,
        }
    }

    pub fn with_prompt(mut self, prompt: PromptDefinition) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn request(
        &self,
        question: &str,
        chunks: &[RetrievedChunk],
        options: &AnswerOptions,
    ) -> AppResult<LlmRequest> {
        let context = build_context(chunks);
        let built = build_rag_prompt(
            &self.prompt,
            question,
            &context,
            options.system_prompt.as_deref(),
        )?;

        tracing::debug!(
            "Prompt built: {} context chunks, context included: {}",
            chunks.len().min(MAX_CONTEXT_CHUNKS),
            built.metadata.context_included
        );

        Ok(LlmRequest::new(
            vec![ChatMessage::system(built.system), ChatMessage::user(built.user)],
            self.model.clone(),
        )
        .with_temperature(options.temperature.unwrap_or(self.temperature)))
    }

    /// Single-shot answer. Generation errors propagate to the caller.
    #[tracing::instrument(skip(self, question, chunks, options), fields(chunks = chunks.len()))]
    pub async fn generate_answer(
        &self,
        question: &str,
        chunks: &[RetrievedChunk],
        options: &AnswerOptions,
    ) -> AppResult<AnswerResult> {
        let request = self.request(question, chunks, options)?;
        let response = self.llm.complete(&request).await.map_err(|e| {
            tracing::error!("Answer generation failed: {}", e);
            e
        })?;

        Ok(AnswerResult {
            answer: response.content,
            sources: extract_sources(chunks),
            usage: response.usage,
            model: Some(response.model),
            context_chunks: chunks.len().min(MAX_CONTEXT_CHUNKS),
        })
    }

    /// Streamed answer: `content` events, then exactly one `end` or `error`.
    ///
    /// Nothing is read from the model once the returned stream is dropped.
    pub async fn stream_answer(
        &self,
        question: &str,
        chunks: &[RetrievedChunk],
        options: &AnswerOptions,
    ) -> AnswerStream {
        let request = match self.request(question, chunks, options) {
            Ok(request) => request.with_streaming(),
            Err(e) => {
                tracing::error!("Failed to build answer request: {}", e);
                return failed(&e);
            }
        };

        let upstream = match self.llm.stream(&request).await {
            Ok(upstream) => upstream,
            Err(e) => {
                tracing::error!("Failed to start answer stream: {}", e);
                return failed(&e);
            }
        };

        let state = StreamState {
            upstream,
            answer: String::new(),
            sources: extract_sources(chunks),
            context_chunks: chunks.len().min(MAX_CONTEXT_CHUNKS),
            pending: VecDeque::new(),
            finished: false,
        };

        stream::unfold(state, |mut state| async move {
            let event = state.next_event().await?;
            Some((event, state))
        })
        .boxed()
    }
}

/// Error events carry the user-facing message; the detail is already logged.
fn failed(e: &AppError) -> AnswerStream {
    stream::iter([AnswerEvent::Error {
        message: e.user_message(),
    }])
    .boxed()
}

struct StreamState {
    upstream: LlmStream,
    answer: String,
    sources: Vec<SourceRef>,
    context_chunks: usize,
    pending: VecDeque<AnswerEvent>,
    finished: bool,
}

impl StreamState {
    async fn next_event(&mut self) -> Option<AnswerEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.finished {
                return None;
            }

            match self.upstream.next().await {
                Some(Ok(delta)) => {
                    if !delta.content.is_empty() {
                        self.answer.push_str(&delta.content);
                        self.pending.push_back(AnswerEvent::Content {
                            content: delta.content.clone(),
                        });
                    }
                    if delta.is_final() {
                        self.finished = true;
                        self.pending.push_back(AnswerEvent::End {
                            answer: std::mem::take(&mut self.answer),
                            sources: std::mem::take(&mut self.sources),
                            source_files: Vec::new(),
                            context_chunks: self.context_chunks,
                        });
                    }
                }
                Some(Err(e)) => {
                    tracing::error!("Answer stream failed: {}", e);
                    self.finished = true;
                    self.pending.push_back(AnswerEvent::Error {
                        message: e.user_message(),
                    });
                }
                None => {
                    tracing::error!("Answer stream ended without a finish signal");
                    self.finished = true;
                    self.pending.push_back(AnswerEvent::Error {
                        message: "Answer stream ended unexpectedly".to_string(),
                    });
                }
            }
        }
    }
}
