//! Embedding provider trait and factory.

use crate::embeddings::config::EmbeddingConfig;
use crate::embeddings::providers::{MockEmbeddings, OllamaEmbeddings, OpenAiCompatEmbeddings};
use kbase_core::{AppError, AppResult};
use std::sync::Arc;
use std::time::Duration;

/// Trait for embedding providers.
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    /// Get provider name (e.g., "mock", "openai-compatible", "ollama")
    fn provider_name(&self) -> &str;

    /// Get model identifier
    fn model_name(&self) -> &str;

    /// Get embedding dimensions
    fn dimensions(&self) -> usize;

    /// Embed every text; the result has exactly one vector per input, in order.
    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>>;

    /// Generate embedding for a single text (convenience method).
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        let mut results = self.embed_batch(&[text.to_string()]).await?;
        if results.len() != 1 {
            return Err(AppError::Embedding(format!(
                "Expected 1 embedding, got {}",
                results.len()
            )));
        }
        results
            .pop()
            .ok_or_else(|| AppError::Embedding("No embedding returned".to_string()))
    }

    /// Bulk-path embedding that never fails as a whole.
    ///
    /// When the batch call fails or comes back misaligned, each text is
    /// retried alone and any text that still fails gets a zero vector.
    async fn embed_batch_tolerant(&self, texts: &[String]) -> Vec<Vec<f32>> {
        match self.embed_batch(texts).await {
            Ok(vectors) if vectors.len() == texts.len() => return vectors,
            Ok(vectors) => tracing::error!(
                "Embedding batch misaligned ({} vectors for {} texts), retrying one by one",
                vectors.len(),
                texts.len()
            ),
            Err(e) => tracing::error!("Embedding batch failed, retrying one by one: {}", e),
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            match self.embed(text).await {
                Ok(vector) => vectors.push(vector),
                Err(e) => {
                    tracing::error!("Embedding failed for item {}: {}", i, e);
                    vectors.push(zero_vector(self.dimensions()));
                }
            }
        }
        vectors
    }
}

/// Placeholder vector for texts that could not be embedded.
pub fn zero_vector(dimensions: usize) -> Vec<f32> {
    vec![0.0; dimensions]
}

/// Element-wise mean of vectors embedded from segments of one text.
///
/// When segment dimensions disagree the first vector is returned as is.
pub fn mean_vectors(vectors: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    if vectors.iter().any(|v| v.len() != first.len()) {
        tracing::warn!("Segment embeddings differ in dimension, keeping the first");
        return first.clone();
    }

    let n = vectors.len() as f32;
    let mut sums = vec![0.0f32; first.len()];
    for vector in vectors {
        for (sum, x) in sums.iter_mut().zip(vector) {
            *sum += x;
        }
    }
    sums.into_iter().map(|s| s / n).collect()
}

/// Create an embedding provider based on configuration.
pub fn create_provider(
    config: &EmbeddingConfig,
    api_key: Option<&str>,
) -> AppResult<Arc<dyn EmbeddingProvider>> {
    let timeout = Duration::from_secs(config.timeout_secs);

    match config.provider.as_str() {
        "mock" => Ok(Arc::new(MockEmbeddings::new(config.dimensions))),

        "openai-compatible" | "openai" | "dashscope" => {
            let key = api_key.ok_or_else(|| {
                AppError::Config(format!("{} embeddings require an API key", config.provider))
            })?;
            let provider = OpenAiCompatEmbeddings::new(config, Some(key.to_string()), timeout)?;
            Ok(Arc::new(provider))
        }

        "ollama" => Ok(Arc::new(OllamaEmbeddings::new(config, timeout)?)),

        _ => Err(AppError::Config(format!(
            "Unknown embedding provider: '{}'. Supported providers: openai-compatible, ollama, mock",
            config.provider
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fails batches larger than one and any text containing "bad".
    #[derive(Debug)]
    struct Flaky;

    #[async_trait::async_trait]
    impl EmbeddingProvider for Flaky {
        fn provider_name(&self) -> &str {
            "flaky"
        }

        fn model_name(&self) -> &str {
            "flaky-v1"
        }

        fn dimensions(&self) -> usize {
            3
        }

        async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
            if texts.len() > 1 || texts.iter().any(|t| t.contains("bad")) {
                return Err(AppError::Transient("429".to_string()));
            }
            Ok(texts.iter().map(|_| vec![1.0, 1.0, 1.0]).collect())
        }
    }

    fn config(provider: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: provider.to_string(),
            dimensions: 8,
            ..Default::default()
        }
    }

    #[test]
    fn test_create_mock_provider() {
        let provider = create_provider(&config("mock"), None).unwrap();
        assert_eq!(provider.provider_name(), "mock");
        assert_eq!(provider.dimensions(), 8);
    }

    #[test]
    fn test_hosted_provider_needs_key() {
        assert!(create_provider(&config("openai-compatible"), None).is_err());
        let provider = create_provider(&config("dashscope"), Some("sk-test")).unwrap();
        assert_eq!(provider.provider_name(), "openai-compatible");
    }

    #[test]
    fn test_create_unknown_provider() {
        let err = create_provider(&config("gguf"), None).unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_mean_vectors() {
        assert_eq!(
            mean_vectors(&[vec![1.0, 3.0], vec![3.0, 5.0]]),
            vec![2.0, 4.0]
        );
        assert_eq!(mean_vectors(&[vec![1.0], vec![3.0, 5.0]]), vec![1.0]);
        assert!(mean_vectors(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_tolerant_batch_zero_fills_failures() {
        let texts = vec!["good".to_string(), "bad".to_string(), "fine".to_string()];
        let vectors = Flaky.embed_batch_tolerant(&texts).await;

        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0], vec![1.0, 1.0, 1.0]);
        assert_eq!(vectors[1], zero_vector(3));
        assert_eq!(vectors[2], vec![1.0, 1.0, 1.0]);
    }

    #[tokio::test]
    async fn test_strict_batch_propagates_error() {
        let texts = vec!["good".to_string(), "fine".to_string()];
        assert!(Flaky.embed_batch(&texts).await.is_err());
    }
}
