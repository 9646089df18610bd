//! Embed-then-index: turns enriched chunks into vector records.
//!
//! The strict path keeps ids, vectors, metadata and documents aligned 1:1
//! and aborts the whole batch otherwise. The tolerant path is for bulk
//! re-indexing, where a zero vector is an acceptable placeholder.

use crate::chunk::{Chunk, Metadata};
use crate::embeddings::EmbeddingProvider;
use crate::vector_index::{VectorIndex, VectorRecord};
use chrono::Utc;
use kbase_core::{AppError, AppResult};
use serde_json::Value;
use std::sync::Arc;

/// Longest document text stored alongside a vector.
pub const MAX_DOCUMENT_CHARS: usize = 6000;

/// Flatten metadata to scalars.
///
/// Lists and maps become JSON strings; nulls and empty strings are dropped.
pub fn clean_metadata(metadata: &Metadata) -> Metadata {
    let mut cleaned = Metadata::new();
    for (key, value) in metadata {
        let value = match value {
            Value::Null => continue,
            Value::String(s) if s.is_empty() => continue,
            Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
            other => other.clone(),
        };
        cleaned.insert(key.clone(), value);
    }
    cleaned
}

/// Where a batch of chunks belongs.
#[derive(Debug, Clone, Copy)]
pub struct IndexTarget<'a> {
    pub collection: &'a str,
    pub knowledge_base_id: &'a str,
    pub file_id: &'a str,
}

/// Writes chunks into a vector index.
#[derive(Clone)]
pub struct Indexer {
    embeddings: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
}

impl Indexer {
    pub fn new(embeddings: Arc<dyn EmbeddingProvider>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embeddings, index }
    }

    /// Embed strictly and upsert; returns the vector ids in chunk order.
    pub async fn index_chunks(
        &self,
        target: IndexTarget<'_>,
        chunks: &[Chunk],
    ) -> AppResult<Vec<String>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let texts = documents(chunks);
        let vectors = self.embeddings.embed_batch(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(AppError::Embedding(format!(
                "Embedding alignment lost: {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        self.write(target, chunks, texts, vectors).await
    }

    /// Like [`index_chunks`](Self::index_chunks), but texts that cannot be
    /// embedded are stored with a zero vector instead of failing the batch.
    pub async fn index_chunks_tolerant(
        &self,
        target: IndexTarget<'_>,
        chunks: &[Chunk],
    ) -> AppResult<Vec<String>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let texts = documents(chunks);
        let vectors = self.embeddings.embed_batch_tolerant(&texts).await;
        self.write(target, chunks, texts, vectors).await
    }

    async fn write(
        &self,
        target: IndexTarget<'_>,
        chunks: &[Chunk],
        texts: Vec<String>,
        vectors: Vec<Vec<f32>>,
    ) -> AppResult<Vec<String>> {
        let mut collection_md = Metadata::new();
        collection_md.insert("knowledge_base_id".into(), target.knowledge_base_id.into());
        collection_md.insert("embedding_model".into(), self.embeddings.model_name().into());
        self.index
            .create_or_get_collection(target.collection, collection_md)
            .await?;

        let created_at = Utc::now().to_rfc3339();
        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(texts)
            .zip(vectors)
            .enumerate()
            .map(|(position, ((chunk, document), vector))| {
                let vector_id = uuid::Uuid::new_v4().to_string();
                let metadata = record_metadata(chunk, position, &vector_id, target, &created_at);
                VectorRecord {
                    id: vector_id,
                    document,
                    metadata,
                    vector,
                }
            })
            .collect();

        let expected = records.len();
        let ids = self.index.upsert(target.collection, records).await?;
        if ids.len() != expected {
            return Err(AppError::Retrieval(format!(
                "Vector index returned {} ids for {} records",
                ids.len(),
                expected
            )));
        }

        tracing::info!(
            "Indexed {} chunks of file {} into '{}'",
            ids.len(),
            target.file_id,
            target.collection
        );
        Ok(ids)
    }
}

fn documents(chunks: &[Chunk]) -> Vec<String> {
    chunks
        .iter()
        .map(|c| c.content.chars().take(MAX_DOCUMENT_CHARS).collect())
        .collect()
}

fn record_metadata(
    chunk: &Chunk,
    position: usize,
    vector_id: &str,
    target: IndexTarget<'_>,
    created_at: &str,
) -> Metadata {
    let mut metadata = chunk.metadata.clone();

    let source_file = chunk
        .metadata_str("original_filename")
        .or_else(|| chunk.metadata_str("source_file"))
        .unwrap_or_default()
        .to_string();

    metadata.insert(
        "chunk_id".into(),
        format!("{}:{}", target.file_id, position).into(),
    );
    metadata.insert("file_id".into(), target.file_id.into());
    metadata.insert("knowledge_base_id".into(), target.knowledge_base_id.into());
    metadata.insert("chunk_index".into(), chunk.chunk_index.into());
    metadata.insert("source_file".into(), source_file.into());
    metadata.insert("vector_id".into(), vector_id.into());
    metadata.insert("created_at".into(), created_at.into());

    clean_metadata(&metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockEmbeddings;
    use crate::vector_index::InMemoryVectorIndex;
    use serde_json::json;

    fn chunk(index: usize, content: &str) -> Chunk {
        let mut metadata = crate::chunk::derive_metadata(content);
        metadata.insert("original_filename".into(), json!("guide.md"));
        metadata.insert("file_type".into(), json!("md"));
        metadata.insert("empty".into(), json!(""));
        Chunk::new(content.to_string(), index, 1000, 200, metadata)
    }

    fn target() -> IndexTarget<'static> {
        IndexTarget {
            collection: "kb_docs",
            knowledge_base_id: "docs",
            file_id: "file-1",
        }
    }

    /// Always returns one vector too few.
    #[derive(Debug)]
    struct Misaligned;

    #[async_trait::async_trait]
    impl EmbeddingProvider for Misaligned {
        fn provider_name(&self) -> &str {
            "misaligned"
        }

        fn model_name(&self) -> &str {
            "m"
        }

        fn dimensions(&self) -> usize {
            2
        }

        async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
            Ok(texts.iter().skip(1).map(|_| vec![1.0, 1.0]).collect())
        }
    }

    #[test]
    fn test_clean_metadata() {
        let mut metadata = Metadata::new();
        metadata.insert("keywords".into(), json!(["rust", "rag"]));
        metadata.insert("range".into(), json!([0, 4]));
        metadata.insert("nested".into(), json!({"a": 1}));
        metadata.insert("none".into(), Value::Null);
        metadata.insert("blank".into(), json!(""));
        metadata.insert("count".into(), json!(3));
        metadata.insert("flag".into(), json!(true));

        let cleaned = clean_metadata(&metadata);
        assert_eq!(cleaned["keywords"], json!("[\"rust\",\"rag\"]"));
        assert_eq!(cleaned["range"], json!("[0,4]"));
        assert_eq!(cleaned["nested"], json!("{\"a\":1}"));
        assert_eq!(cleaned["count"], json!(3));
        assert_eq!(cleaned["flag"], json!(true));
        assert!(!cleaned.contains_key("none"));
        assert!(!cleaned.contains_key("blank"));
    }

    #[tokio::test]
    async fn test_index_chunks_writes_aligned_records() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let indexer = Indexer::new(Arc::new(MockEmbeddings::new(32)), index.clone());
        let chunks = vec![chunk(0, "vector search basics"), chunk(1, "prompt templates")];

        let ids = indexer.index_chunks(target(), &chunks).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(index.count("kb_docs").await.unwrap(), 2);

        let query = MockEmbeddings::new(32).embed("prompt templates").await.unwrap();
        let hits = index.query("kb_docs", &query, 1).await.unwrap();
        let md = &hits[0].metadata;
        assert_eq!(hits[0].document, "prompt templates");
        assert_eq!(md["chunk_id"], "file-1:1");
        assert_eq!(md["file_id"], "file-1");
        assert_eq!(md["knowledge_base_id"], "docs");
        assert_eq!(md["source_file"], "guide.md");
        assert_eq!(md["vector_id"], json!(hits[0].id));
        assert!(md["keywords"].is_string());
        assert!(!md.contains_key("empty"));
    }

    #[tokio::test]
    async fn test_documents_are_clipped() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let indexer = Indexer::new(Arc::new(MockEmbeddings::new(8)), index.clone());
        let long = "知".repeat(MAX_DOCUMENT_CHARS + 10);

        indexer.index_chunks(target(), &[chunk(0, &long)]).await.unwrap();
        let hits = index.query("kb_docs", &[0.0; 8], 1).await.unwrap();
        assert_eq!(hits[0].document.chars().count(), MAX_DOCUMENT_CHARS);
    }

    #[tokio::test]
    async fn test_misalignment_aborts_batch() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let indexer = Indexer::new(Arc::new(Misaligned), index.clone());
        let chunks = vec![chunk(0, "one"), chunk(1, "two")];

        let err = indexer.index_chunks(target(), &chunks).await.unwrap_err();
        assert!(err.to_string().contains("alignment"));
        assert_eq!(index.count("kb_docs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tolerant_path_fills_zero_vectors() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let indexer = Indexer::new(Arc::new(Misaligned), index.clone());
        let chunks = vec![chunk(0, "one"), chunk(1, "two")];

        let ids = indexer.index_chunks_tolerant(target(), &chunks).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(index.count("kb_docs").await.unwrap(), 2);
    }
}
