//! Retrieval gateway: query text in, normalized chunks out.
//!
//! Retrieval never fails the caller. Any error (embedding, missing
//! collection, malformed hit) is logged and degrades to "no context".

use crate::embeddings::EmbeddingProvider;
use crate::rag::types::RetrievedChunk;
use crate::vector_index::{VectorHit, VectorIndex};
use kbase_core::AppResult;
use std::sync::Arc;

/// Relevance score for an L2 distance; `None` when the distance is not a number.
pub fn score_from_distance(distance: f64) -> Option<f64> {
    if !distance.is_finite() || distance < 0.0 {
        return None;
    }
    Some(1.0 / (1.0 + distance))
}

fn metadata_string(hit: &VectorHit, key: &str) -> Option<String> {
    hit.metadata
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Normalize one raw hit.
pub fn to_retrieved(hit: VectorHit) -> RetrievedChunk {
    let source_file =
        metadata_string(&hit, "source_file").or_else(|| metadata_string(&hit, "file_name"));
    let id = metadata_string(&hit, "chunk_id").or_else(|| Some(hit.id.clone()));

    RetrievedChunk {
        source_file,
        file_type: metadata_string(&hit, "file_type"),
        id,
        score: score_from_distance(hit.distance),
        file_id: metadata_string(&hit, "file_id"),
        vector_id: metadata_string(&hit, "vector_id").or_else(|| Some(hit.id.clone())),
        content: hit.document,
        metadata: hit.metadata,
    }
}

/// Embeds queries and searches one collection.
#[derive(Clone)]
pub struct RetrievalGateway {
    embeddings: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
}

impl RetrievalGateway {
    pub fn new(embeddings: Arc<dyn EmbeddingProvider>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embeddings, index }
    }

    /// At most `max_results` chunks, most relevant first; empty on any failure.
    #[tracing::instrument(skip(self, query), fields(query_len = query.len()))]
    pub async fn search(
        &self,
        collection: &str,
        query: &str,
        max_results: usize,
    ) -> Vec<RetrievedChunk> {
        match self.try_search(collection, query, max_results).await {
            Ok(chunks) => {
                tracing::info!("Retrieved {} chunks from '{}'", chunks.len(), collection);
                chunks
            }
            Err(e) => {
                tracing::error!("Search failed in '{}': {}", collection, e);
                Vec::new()
            }
        }
    }

    async fn try_search(
        &self,
        collection: &str,
        query: &str,
        max_results: usize,
    ) -> AppResult<Vec<RetrievedChunk>> {
        if max_results == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embeddings.embed(query).await?;
        let hits = self.index.query(collection, &vector, max_results).await?;

        Ok(hits
            .into_iter()
            .take(max_results)
            .map(to_retrieved)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Metadata;
    use crate::embeddings::MockEmbeddings;
    use crate::vector_index::{InMemoryVectorIndex, VectorRecord};
    use kbase_core::AppError;
    use proptest::prelude::*;
    use serde_json::json;

    const DIMS: usize = 64;

    async fn gateway_with(docs: &[(&str, &str)]) -> RetrievalGateway {
        let embeddings = Arc::new(MockEmbeddings::new(DIMS));
        let index = Arc::new(InMemoryVectorIndex::new());
        index.create_or_get_collection("kb_docs", Metadata::new()).await.unwrap();

        let mut records = Vec::new();
        for (i, (file, text)) in docs.iter().enumerate() {
            let mut metadata = Metadata::new();
            metadata.insert("source_file".into(), json!(file));
            metadata.insert("file_type".into(), json!("md"));
            metadata.insert("chunk_id".into(), json!(format!("f:{}", i)));
            records.push(VectorRecord {
                id: format!("v{}", i),
                document: text.to_string(),
                metadata,
                vector: embeddings.embed(text).await.unwrap(),
            });
        }
        index.upsert("kb_docs", records).await.unwrap();
        RetrievalGateway::new(embeddings, index)
    }

    #[derive(Debug)]
    struct Down;

    #[async_trait::async_trait]
    impl EmbeddingProvider for Down {
        fn provider_name(&self) -> &str {
            "down"
        }

        fn model_name(&self) -> &str {
            "down"
        }

        fn dimensions(&self) -> usize {
            DIMS
        }

        async fn embed_batch(&self, _texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
            Err(AppError::Transient("connection refused".to_string()))
        }
    }

    #[test]
    fn test_score_from_distance() {
        assert_eq!(score_from_distance(0.0), Some(1.0));
        assert_eq!(score_from_distance(1.0), Some(0.5));
        assert_eq!(score_from_distance(f64::NAN), None);
        assert_eq!(score_from_distance(f64::INFINITY), None);
    }

    #[test]
    fn test_to_retrieved_falls_back() {
        let mut metadata = Metadata::new();
        metadata.insert("file_name".into(), json!("legacy.txt"));
        let chunk = to_retrieved(VectorHit {
            id: "v9".to_string(),
            document: "text".to_string(),
            metadata,
            distance: 3.0,
        });

        assert_eq!(chunk.source_file.as_deref(), Some("legacy.txt"));
        assert_eq!(chunk.id.as_deref(), Some("v9"));
        assert_eq!(chunk.vector_id.as_deref(), Some("v9"));
        assert_eq!(chunk.score, Some(0.25));
        assert_eq!(chunk.file_type, None);
    }

    #[tokio::test]
    async fn test_search_ranks_matching_document_first() {
        let gateway = gateway_with(&[
            ("cake.md", "chocolate cake recipe"),
            ("index.md", "vector index construction"),
            ("rust.md", "ownership and borrowing"),
        ])
        .await;

        let results = gateway.search("kb_docs", "vector index construction", 2).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].source_file.as_deref(), Some("index.md"));
        assert_eq!(results[0].id.as_deref(), Some("f:1"));
        assert_eq!(results[0].score, Some(1.0));
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_missing_collection_is_empty() {
        let gateway = gateway_with(&[("a.md", "alpha")]).await;
        assert!(gateway.search("kb_other", "alpha", 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_is_empty() {
        let gateway = RetrievalGateway::new(Arc::new(Down), Arc::new(InMemoryVectorIndex::new()));
        assert!(gateway.search("kb_docs", "anything", 5).await.is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_never_exceeds_max_results(doc_count in 0usize..12, k in 0usize..15) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let results = rt.block_on(async {
                let docs: Vec<(String, String)> = (0..doc_count)
                    .map(|i| (format!("f{}.md", i), format!("document number {}", i)))
                    .collect();
                let borrowed: Vec<(&str, &str)> =
                    docs.iter().map(|(f, t)| (f.as_str(), t.as_str())).collect();
                gateway_with(&borrowed).await.search("kb_docs", "document", k).await
            });
            prop_assert!(results.len() <= k);
            prop_assert_eq!(results.len(), doc_count.min(k));
        }
    }
}
