//! Vector index abstraction for knowledge chunks.
//!
//! Collections hold `{id, document, metadata, vector}` records and answer
//! nearest-neighbour queries by L2 distance. Bases are stored in LanceDB
//! (see [`crate::lancedb_index`]); the in-memory index backs tests.

use crate::chunk::Metadata;
use kbase_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// One stored vector with its document text and flat metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    pub vector: Vec<f32>,
}

/// One nearest-neighbour result; smaller distance is closer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    pub distance: f64,
}

/// Trait for vector index backends.
#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create a collection, or return the existing one untouched.
    async fn create_or_get_collection(&self, name: &str, metadata: Metadata) -> AppResult<()>;

    /// Drop a collection. Missing collections are not an error.
    async fn delete_collection(&self, name: &str) -> AppResult<()>;

    /// Insert or replace records; returns one id per record, in order.
    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> AppResult<Vec<String>>;

    /// The `top_k` records closest to `vector`, nearest first.
    async fn query(&self, collection: &str, vector: &[f32], top_k: usize)
        -> AppResult<Vec<VectorHit>>;

    /// Number of records in a collection.
    async fn count(&self, collection: &str) -> AppResult<usize>;
}

#[derive(Debug, Default, Clone)]
struct Collection {
    /// Insertion order is the tie-breaker for equal distances
    records: Vec<VectorRecord>,
}

/// Process-local index for tests and embedding into other services.
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    collections: RwLock<HashMap<String, Collection>>,
}

fn l2_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = (*x - *y) as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

fn lock_poisoned() -> AppError {
    AppError::Retrieval("Vector index lock poisoned".to_string())
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn create_or_get_collection(&self, name: &str, metadata: Metadata) -> AppResult<()> {
        let mut collections = self.collections.write().map_err(|_| lock_poisoned())?;
        collections.entry(name.to_string()).or_insert_with(|| {
            tracing::info!("Created collection '{}' ({} metadata keys)", name, metadata.len());
            Collection::default()
        });
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> AppResult<()> {
        let mut collections = self.collections.write().map_err(|_| lock_poisoned())?;
        if collections.remove(name).is_some() {
            tracing::info!("Deleted collection '{}'", name);
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> AppResult<Vec<String>> {
        let mut collections = self.collections.write().map_err(|_| lock_poisoned())?;
        let target = collections.get_mut(collection).ok_or_else(|| {
            AppError::Retrieval(format!("Collection '{}' does not exist", collection))
        })?;

        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            ids.push(record.id.clone());
            match target.records.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record,
                None => target.records.push(record),
            }
        }
        Ok(ids)
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> AppResult<Vec<VectorHit>> {
        let collections = self.collections.read().map_err(|_| lock_poisoned())?;
        let target = collections.get(collection).ok_or_else(|| {
            AppError::Retrieval(format!("Collection '{}' does not exist", collection))
        })?;

        let mut scored: Vec<(f64, &VectorRecord)> = target
            .records
            .iter()
            .map(|r| (l2_distance(&r.vector, vector), r))
            .collect();
        // stable sort keeps insertion order for ties
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(distance, r)| VectorHit {
                id: r.id.clone(),
                document: r.document.clone(),
                metadata: r.metadata.clone(),
                distance,
            })
            .collect())
    }

    async fn count(&self, collection: &str) -> AppResult<usize> {
        let collections = self.collections.read().map_err(|_| lock_poisoned())?;
        Ok(collections.get(collection).map_or(0, |c| c.records.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, vector: Vec<f32>) -> VectorRecord {
        let mut metadata = Metadata::new();
        metadata.insert("source_file".to_string(), json!(format!("{}.md", id)));
        VectorRecord {
            id: id.to_string(),
            document: format!("doc {}", id),
            metadata,
            vector,
        }
    }

    async fn seeded() -> InMemoryVectorIndex {
        let index = InMemoryVectorIndex::new();
        index.create_or_get_collection("kb", Metadata::new()).await.unwrap();
        index
            .upsert(
                "kb",
                vec![
                    record("far", vec![10.0, 0.0]),
                    record("tie-a", vec![0.0, 1.0]),
                    record("tie-b", vec![1.0, 0.0]),
                    record("exact", vec![0.0, 0.0]),
                ],
            )
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn test_query_orders_by_distance_then_insertion() {
        let index = seeded().await;
        let hits = index.query("kb", &[0.0, 0.0], 3).await.unwrap();

        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "tie-a", "tie-b"]);
        assert_eq!(hits[0].distance, 0.0);
        assert_eq!(hits[1].distance, 1.0);
    }

    #[tokio::test]
    async fn test_upsert_returns_ids_and_replaces() {
        let index = seeded().await;
        let ids = index
            .upsert("kb", vec![record("exact", vec![5.0, 5.0]), record("new", vec![1.0, 1.0])])
            .await
            .unwrap();

        assert_eq!(ids, vec!["exact", "new"]);
        assert_eq!(index.count("kb").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_missing_collection() {
        let index = InMemoryVectorIndex::new();
        assert!(index.query("nope", &[0.0], 1).await.is_err());
        assert!(index.upsert("nope", vec![]).await.is_err());
        assert_eq!(index.count("nope").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_collection_idempotent() {
        let index = seeded().await;
        index.delete_collection("kb").await.unwrap();
        index.delete_collection("kb").await.unwrap();
        assert_eq!(index.count("kb").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_or_get_keeps_records() {
        let index = seeded().await;
        index.create_or_get_collection("kb", Metadata::new()).await.unwrap();
        assert_eq!(index.count("kb").await.unwrap(), 4);
    }
}
