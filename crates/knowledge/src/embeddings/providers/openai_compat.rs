//! OpenAI-compatible embeddings provider.
//!
//! POSTs `{model, input}` to `{endpoint}/embeddings`. Inputs longer than the
//! service's safe length are split into segments whose vectors are averaged,
//! so callers always get one vector per input text.

use crate::chunk::char_len;
use crate::chunk::splitters::split_text;
use crate::embeddings::config::EmbeddingConfig;
use crate::embeddings::provider::{mean_vectors, EmbeddingProvider};
use kbase_core::{AppError, AppResult};
use kbase_llm::providers::openai_compat::DEFAULT_ENDPOINT;
use kbase_llm::{status_error, transport_error, with_retries, RetryPolicy};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

const PROVIDER: &str = "openai-compatible";

/// Longest text sent as one input; roughly 8k tokens for mixed CJK/English.
pub const MAX_INPUT_CHARS: usize = 6000;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// Embeddings client for OpenAI-compatible APIs (DashScope by default).
pub struct OpenAiCompatEmbeddings {
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
    batch_size: usize,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl std::fmt::Debug for OpenAiCompatEmbeddings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatEmbeddings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl OpenAiCompatEmbeddings {
    pub fn new(
        config: &EmbeddingConfig,
        api_key: Option<String>,
        timeout: Duration,
    ) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Embedding(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = config.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            dimensions: config.dimensions,
            batch_size: config.batch_size.max(1),
            client,
            retry: RetryPolicy::new(config.max_retries),
        })
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// One request for a batch of inputs.
    async fn post(&self, inputs: &[String]) -> AppResult<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = EmbeddingRequest {
            model: &self.model,
            input: inputs,
        };

        let mut builder = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e, AppError::Embedding))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(status_error(PROVIDER, status, &error_text, AppError::Embedding));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| AppError::Embedding(format!("Failed to parse embeddings response: {}", e)))?;

        parse_embeddings(&json)
    }
}

/// Split text longer than [`MAX_INPUT_CHARS`] at natural boundaries.
fn soft_segments(text: &str) -> Vec<String> {
    if char_len(text) <= MAX_INPUT_CHARS {
        return vec![text.to_string()];
    }
    let segments = split_text(text, MAX_INPUT_CHARS, 0, None);
    if segments.is_empty() {
        vec![text.chars().take(MAX_INPUT_CHARS).collect()]
    } else {
        segments
    }
}

fn as_vector(value: &Value) -> Option<Vec<f32>> {
    value
        .as_array()?
        .iter()
        .map(|x| x.as_f64().map(|f| f as f32))
        .collect()
}

/// Vector from either a bare array or an object with an `embedding` field.
fn item_vector(item: &Value) -> Option<Vec<f32>> {
    as_vector(item).or_else(|| item.get("embedding").and_then(as_vector))
}

/// Extract vectors from the three response shapes seen in the wild:
/// `data[].embedding` (OpenAI), `output.embeddings[].embedding` (DashScope
/// native) and a top-level list of vectors under any key.
fn parse_embeddings(body: &Value) -> AppResult<Vec<Vec<f32>>> {
    let items = body
        .get("data")
        .and_then(Value::as_array)
        .or_else(|| {
            body.get("output")
                .and_then(|o| o.get("embeddings"))
                .and_then(Value::as_array)
        })
        .or_else(|| {
            body.as_object()?.values().find_map(|v| {
                let list = v.as_array()?;
                list.first()?.as_array()?;
                Some(list)
            })
        });

    let Some(items) = items else {
        tracing::error!("Unexpected embeddings response format: {}", body);
        return Err(AppError::Embedding(
            "Failed to extract embeddings from response".to_string(),
        ));
    };

    let mut indexed = Vec::with_capacity(items.len());
    for (position, item) in items.iter().enumerate() {
        let index = item
            .get("index")
            .or_else(|| item.get("text_index"))
            .and_then(Value::as_u64)
            .map(|i| i as usize)
            .unwrap_or(position);
        let vector = item_vector(item).ok_or_else(|| {
            AppError::Embedding(format!("Malformed embedding at position {}", position))
        })?;
        indexed.push((index, vector));
    }

    if indexed.is_empty() {
        return Err(AppError::Embedding(
            "Embeddings response contained no vectors".to_string(),
        ));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[async_trait::async_trait]
impl EmbeddingProvider for OpenAiCompatEmbeddings {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[tracing::instrument(skip(self, texts), fields(count = texts.len(), model = %self.model))]
    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // (start, count) of each text's segments in the flattened list
        let mut spans = Vec::with_capacity(texts.len());
        let mut segments: Vec<String> = Vec::with_capacity(texts.len());
        for text in texts {
            let parts = soft_segments(text);
            spans.push((segments.len(), parts.len()));
            segments.extend(parts);
        }

        let mut vectors = Vec::with_capacity(segments.len());
        for (n, batch) in segments.chunks(self.batch_size).enumerate() {
            let got = with_retries(&self.retry, "embeddings", || self.post(batch)).await?;
            if got.len() != batch.len() {
                return Err(AppError::Embedding(format!(
                    "Embeddings count mismatch in batch {}: got {}, expected {}",
                    n + 1,
                    got.len(),
                    batch.len()
                )));
            }
            vectors.extend(got);
        }

        tracing::info!(
            "Created embeddings for {} texts ({} segments) using model {}",
            texts.len(),
            segments.len(),
            self.model
        );

        Ok(spans
            .into_iter()
            .map(|(start, count)| mean_vectors(&vectors[start..start + count]))
            .collect())
    }
}
