//! Ollama embedding provider.
//!
//! Semantic embeddings from a local Ollama runtime (`nomic-embed-text` and
//! friends). The `/api/embeddings` endpoint takes one prompt per request, so
//! batches are embedded sequentially.

use crate::embeddings::config::EmbeddingConfig;
use crate::embeddings::provider::{zero_vector, EmbeddingProvider};
use kbase_core::{AppError, AppResult};
use kbase_llm::providers::ollama::DEFAULT_ENDPOINT;
use kbase_llm::{status_error, transport_error, with_retries, RetryPolicy};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

const PROVIDER: &str = "ollama";
const EMBEDDING_PATH: &str = "/api/embeddings";

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Ollama embedding provider using the local API
#[derive(Debug, Clone)]
pub struct OllamaEmbeddings {
    client: Client,
    base_url: String,
    model: String,
    dimensions: usize,
    retry: RetryPolicy,
}

impl OllamaEmbeddings {
    /// Build a provider; the endpoint falls back to `OLLAMA_URL`, then localhost.
    pub fn new(config: &EmbeddingConfig, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            AppError::Embedding(format!("Failed to create HTTP client for Ollama: {}", e))
        })?;

        let base_url = config
            .endpoint
            .clone()
            .or_else(|| std::env::var("OLLAMA_URL").ok())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            retry: RetryPolicy::new(config.max_retries),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Embed single text (no retries)
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    async fn embed_single(&self, text: &str) -> AppResult<Vec<f32>> {
        let url = format!("{}{}", self.base_url, EMBEDDING_PATH);
        let request = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        debug!("Sending embedding request to {}", url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e, AppError::Embedding))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(status_error(PROVIDER, status, &error_text, AppError::Embedding));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| AppError::Embedding(format!("Failed to parse Ollama response: {}", e)))?;

        if body.embedding.len() != self.dimensions {
            return Err(AppError::Embedding(format!(
                "Ollama model '{}' returned {} dimensions, expected {}",
                self.model,
                body.embedding.len(),
                self.dimensions
            )));
        }

        Ok(body.embedding)
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for OllamaEmbeddings {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[instrument(skip(self, texts), fields(batch_size = texts.len(), model = %self.model))]
    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());

        for (i, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                warn!("Empty text at index {}, using zero vector", i);
                embeddings.push(zero_vector(self.dimensions));
                continue;
            }

            let embedding =
                with_retries(&self.retry, "ollama embeddings", || self.embed_single(text))
                    .await?;
            embeddings.push(embedding);
        }

        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> OllamaEmbeddings {
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            model: "nomic-embed-text".to_string(),
            dimensions: 3,
            endpoint: Some(server.uri()),
            ..Default::default()
        };
        OllamaEmbeddings::new(&config, Duration::from_secs(5))
            .unwrap()
            .with_retry_policy(
                RetryPolicy::new(3)
                    .with_backoff(Duration::from_millis(1), Duration::from_millis(2)),
            )
    }

    #[tokio::test]
    async fn test_embed_batch_one_request_per_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .and(body_partial_json(json!({"model": "nomic-embed-text"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embedding": [0.1, 0.2, 0.3]})))
            .expect(2)
            .mount(&server)
            .await;

        let texts = vec!["first".to_string(), "  ".to_string(), "third".to_string()];
        let vectors = provider(&server).embed_batch(&texts).await.unwrap();

        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0], vec![0.1, 0.2, 0.3]);
        assert_eq!(vectors[1], vec![0.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embedding": [0.1]})))
            .mount(&server)
            .await;

        let err = provider(&server).embed("text").await.unwrap_err();
        assert!(err.to_string().contains("expected 3"));
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embedding": [1.0, 0.0, 0.0]})))
            .mount(&server)
            .await;

        let vector = provider(&server).embed("text").await.unwrap();
        assert_eq!(vector, vec![1.0, 0.0, 0.0]);
    }
}
