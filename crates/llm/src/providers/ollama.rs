//! Ollama chat provider.
//!
//! Talks to a local Ollama runtime via `/api/chat`.
//! Ollama API: https://github.com/ollama/ollama/blob/main/docs/api.md

use crate::client::{
    ChatMessage, LlmClient, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk, LlmUsage,
};
use crate::retry::{status_error, transport_error};
use futures::StreamExt;
use kbase_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";

/// Ollama API request format.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize, Default)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

/// Ollama API response format (one NDJSON line when streaming).
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

impl OllamaChatResponse {
    fn usage(&self) -> Option<LlmUsage> {
        if self.done {
            Some(LlmUsage::new(
                self.prompt_eval_count.unwrap_or(0),
                self.eval_count.unwrap_or(0),
            ))
        } else {
            None
        }
    }

    fn into_chunk(self) -> LlmStreamChunk {
        let usage = self.usage();
        let finish_reason = if self.done {
            Some(self.done_reason.unwrap_or_else(|| "stop".to_string()))
        } else {
            None
        };
        LlmStreamChunk {
            content: self.message.map(|m| m.content).unwrap_or_default(),
            model: self.model,
            done: self.done,
            finish_reason,
            usage,
        }
    }
}

/// Ollama chat client.
#[derive(Debug)]
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Create a client for the default local endpoint.
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_ENDPOINT)
    }

    /// Create a client with a custom base URL.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self::with_http_client(base_url, reqwest::Client::new())
    }

    /// Create a client with a preconfigured HTTP client (timeouts etc).
    pub fn with_http_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    fn to_ollama_request(&self, request: &LlmRequest, stream: bool) -> OllamaChatRequest {
        let options = if request.temperature.is_some()
            || request.top_p.is_some()
            || request.max_tokens.is_some()
        {
            Some(OllamaOptions {
                temperature: request.temperature,
                top_p: request.top_p,
                num_predict: request.max_tokens,
            })
        } else {
            None
        };

        OllamaChatRequest {
            model: request.model.clone(),
            messages: request.messages.clone(),
            stream,
            options,
        }
    }

    async fn send(&self, body: &OllamaChatRequest) -> AppResult<reqwest::Response> {
        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error("Ollama", e, AppError::Llm))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(status_error("Ollama", status, &error_text, AppError::Llm));
        }

        Ok(response)
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LlmClient for OllamaClient {
    fn provider_name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
        tracing::info!("Sending chat request to Ollama");
        tracing::debug!("Request: {:?}", request);

        let response = self.send(&self.to_ollama_request(request, false)).await?;

        let ollama_response: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to parse Ollama response: {}", e)))?;

        let chunk = ollama_response.into_chunk();

        Ok(LlmResponse {
            content: chunk.content,
            model: chunk.model,
            usage: chunk.usage,
            finish_reason: chunk.finish_reason,
        })
    }

    async fn stream(&self, request: &LlmRequest) -> AppResult<LlmStream> {
        tracing::info!("Starting streaming chat request to Ollama");

        let response = self.send(&self.to_ollama_request(request, true)).await?;

        // NDJSON lines can straddle network chunks, so carry the tail over.
        let lines = response
            .bytes_stream()
            .scan(String::new(), |pending, result| {
                let batch: Vec<AppResult<LlmStreamChunk>> = match result {
                    Ok(bytes) => {
                        pending.push_str(&String::from_utf8_lossy(&bytes));
                        drain_complete_lines(pending)
                    }
                    Err(e) => vec![Err(AppError::Llm(format!("Stream error: {}", e)))],
                };
                futures::future::ready(Some(futures::stream::iter(batch)))
            })
            .flatten();

        Ok(Box::pin(lines))
    }
}

/// Parse every complete line in `pending`, leaving a partial trailing line in place.
fn drain_complete_lines(pending: &mut String) -> Vec<AppResult<LlmStreamChunk>> {
    let mut parsed = Vec::new();

    while let Some(newline) = pending.find('\n') {
        let line: String = pending.drain(..=newline).collect();
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        parsed.push(
            serde_json::from_str::<OllamaChatResponse>(line)
                .map(OllamaChatResponse::into_chunk)
                .map_err(|e| AppError::Llm(format!("Failed to parse chunk: {}", e))),
        );
    }

    parsed
}
