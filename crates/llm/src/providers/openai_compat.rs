//! OpenAI-compatible chat completion provider.
//!
//! Works against any `/chat/completions` endpoint that follows the OpenAI
//! wire format, including DashScope's compatible mode (the default endpoint).
//! Streaming responses are Server-Sent Events terminated by `data: [DONE]`.

use crate::client::{
    ChatMessage, LlmClient, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk, LlmUsage,
};
use crate::retry::{status_error, transport_error, with_retries, RetryPolicy};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use kbase_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

const PROVIDER: &str = "openai-compatible";

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<LlmUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<LlmUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Chat client for OpenAI-compatible APIs.
pub struct OpenAiCompatClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl std::fmt::Debug for OpenAiCompatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatClient")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("retry", &self.retry)
            .finish()
    }
}

impl OpenAiCompatClient {
    /// Create a client with a request timeout.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Llm(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn to_wire<'a>(&self, request: &'a LlmRequest, stream: bool) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            top_p: request.top_p,
            max_tokens: request.max_tokens,
            stream,
        }
    }

    async fn send(&self, body: &ChatCompletionRequest<'_>) -> AppResult<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut builder = self.client.post(&url).json(body);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e, AppError::Llm))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(status_error(PROVIDER, status, &error_text, AppError::Llm));
        }

        Ok(response)
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiCompatClient {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    #[tracing::instrument(skip(self, request), fields(model = %request.model, messages = request.messages.len()))]
    async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
        tracing::info!("Sending chat completion request");

        let body = self.to_wire(request, false);

        let parsed: ChatCompletionResponse = with_retries(&self.retry, "chat completion", || async {
            let response = self.send(&body).await?;
            response
                .json::<ChatCompletionResponse>()
                .await
                .map_err(|e| AppError::Llm(format!("Failed to parse chat response: {}", e)))
        })
        .await?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Llm("Chat response contained no choices".to_string()))?;

        tracing::info!("Received chat completion");

        Ok(LlmResponse {
            content: choice.message.content.unwrap_or_default(),
            model: parsed.model.unwrap_or_else(|| request.model.clone()),
            usage: parsed.usage,
            finish_reason: choice.finish_reason,
        })
    }

    #[tracing::instrument(skip(self, request), fields(model = %request.model, messages = request.messages.len()))]
    async fn stream(&self, request: &LlmRequest) -> AppResult<LlmStream> {
        tracing::info!("Starting streaming chat request");

        let body = self.to_wire(request, true);
        let response =
            with_retries(&self.retry, "chat stream", || async { self.send(&body).await }).await?;

        Ok(sse_to_stream(response, request.model.clone()))
    }
}

/// Convert an SSE chat response into a stream of deltas.
fn sse_to_stream(response: reqwest::Response, model: String) -> LlmStream {
    let events = response.bytes_stream().eventsource();
    let mapped = events.filter_map(move |event| {
        let result = match event {
            Ok(event) => parse_stream_event(&event.data, &model),
            Err(e) => Some(Err(AppError::Llm(format!("SSE parse error: {}", e)))),
        };
        futures::future::ready(result)
    });
    Box::pin(mapped)
}

/// Parse one SSE `data:` payload.
///
/// Returns `None` for keep-alive payloads that carry nothing useful.
fn parse_stream_event(data: &str, model: &str) -> Option<AppResult<LlmStreamChunk>> {
    let data = data.trim();
    if data.is_empty() {
        return None;
    }

    if data == "[DONE]" {
        return Some(Ok(LlmStreamChunk {
            model: model.to_string(),
            done: true,
            ..Default::default()
        }));
    }

    let event: StreamEvent = match serde_json::from_str(data) {
        Ok(event) => event,
        Err(e) => {
            return Some(Err(AppError::Llm(format!(
                "Failed to parse stream chunk: {}",
                e
            ))))
        }
    };

    let (content, finish_reason) = match event.choices.into_iter().next() {
        Some(choice) => (choice.delta.content.unwrap_or_default(), choice.finish_reason),
        None => (String::new(), None),
    };

    if content.is_empty() && finish_reason.is_none() && event.usage.is_none() {
        return None;
    }

    Some(Ok(LlmStreamChunk {
        content,
        model: event.model.unwrap_or_else(|| model.to_string()),
        done: false,
        finish_reason,
        usage: event.usage,
    }))
}
