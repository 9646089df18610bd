//! Ranking through the index, retrieval and citation path.

use crate::chunk::{Chunk, Metadata};
use crate::embeddings::EmbeddingProvider;
use crate::indexer::{IndexTarget, Indexer};
use crate::rag::answer::extract_sources;
use crate::rag::search::RetrievalGateway;
use crate::vector_index::InMemoryVectorIndex;
use kbase_core::{AppError, AppResult};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// Returns a preset vector per text.
#[derive(Debug)]
struct Fixed(HashMap<String, Vec<f32>>);

impl Fixed {
    fn new(pairs: &[(&str, Vec<f32>)]) -> Arc<Self> {
        Arc::new(Self(
            pairs
                .iter()
                .map(|(text, v)| (text.to_string(), normalize(v)))
                .collect(),
        ))
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for Fixed {
    fn provider_name(&self) -> &str {
        "fixed"
    }

    fn model_name(&self) -> &str {
        "fixed"
    }

    fn dimensions(&self) -> usize {
        4
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        texts
            .iter()
            .map(|t| {
                self.0
                    .get(t)
                    .cloned()
                    .ok_or_else(|| AppError::Embedding(format!("no vector for {}", t)))
            })
            .collect()
    }
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

fn chunk(index: usize, source: &str, text: &str) -> Chunk {
    let mut metadata = Metadata::new();
    metadata.insert("original_filename".into(), json!(source));
    Chunk::new(text.to_string(), index, 1000, 200, metadata)
}

async fn indexed(provider: Arc<Fixed>, chunks: &[Chunk]) -> RetrievalGateway {
    let index = Arc::new(InMemoryVectorIndex::new());
    let target = IndexTarget {
        collection: "kb_test",
        knowledge_base_id: "test",
        file_id: "file",
    };
    Indexer::new(provider.clone(), index.clone())
        .index_chunks(target, chunks)
        .await
        .unwrap();
    RetrievalGateway::new(provider, index)
}

#[tokio::test]
async fn test_relevant_chunk_ranks_first() {
    let provider = Fixed::new(&[
        ("Rust is a systems programming language", vec![1.0, 0.5, 0.2, 0.1]),
        ("Cooking recipes for pasta", vec![-0.3, -0.8, 0.4, -0.2]),
        ("rust programming", vec![0.9, 0.4, 0.3, 0.1]),
    ]);
    let gateway = indexed(
        provider,
        &[
            chunk(0, "rust.md", "Rust is a systems programming language"),
            chunk(1, "pasta.md", "Cooking recipes for pasta"),
        ],
    )
    .await;

    let results = gateway.search("kb_test", "rust programming", 5).await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].source_file.as_deref(), Some("rust.md"));

    let top = results[0].score.unwrap();
    let other = results[1].score.unwrap();
    assert!(top > 0.85, "relevant chunk score should be high: {}", top);
    assert!(top > other);
}

#[tokio::test]
async fn test_scores_descend_and_citations_follow_order() {
    let provider = Fixed::new(&[
        ("Text A", vec![1.0, 0.0, 0.0, 0.0]),
        ("Text B", vec![0.7, 0.7, 0.0, 0.0]),
        ("Text C", vec![0.0, 1.0, 0.0, 0.0]),
        ("Text D", vec![-1.0, 0.0, 0.0, 0.0]),
        ("query", vec![1.0, 0.0, 0.0, 0.0]),
    ]);
    let gateway = indexed(
        provider,
        &[
            chunk(0, "d.md", "Text D"),
            chunk(1, "c.md", "Text C"),
            chunk(2, "b.md", "Text B"),
            chunk(3, "a.md", "Text A"),
        ],
    )
    .await;

    let results = gateway.search("kb_test", "query", 10).await;
    assert_eq!(results.len(), 4);
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert_eq!(results[0].content, "Text A");
    assert!(results[0].score.unwrap() > 0.99);

    let names: Vec<String> = extract_sources(&results)
        .into_iter()
        .map(|s| s.file_name)
        .collect();
    assert_eq!(names, vec!["a.md", "b.md", "c.md", "d.md"]);
}

#[tokio::test]
async fn test_unembeddable_query_yields_no_context() {
    let provider = Fixed::new(&[("known", vec![1.0, 0.0, 0.0, 0.0])]);
    let gateway = indexed(provider, &[chunk(0, "k.md", "known")]).await;

    assert!(gateway.search("kb_test", "unknown", 5).await.is_empty());
}
