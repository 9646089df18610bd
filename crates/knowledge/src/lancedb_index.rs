//! LanceDB-backed vector index.
//!
//! Each base owns one LanceDB database directory and each collection is a
//! table with `id`, `document`, `metadata` (JSON) and a fixed-size `vector`
//! column. Writes go through LanceDB's own commit protocol, so concurrent
//! ingests into one base do not overwrite each other.

use crate::chunk::Metadata;
use crate::vector_index::{VectorHit, VectorIndex, VectorRecord};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use futures::TryStreamExt;
use kbase_core::{AppError, AppResult};
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

const DISTANCE_COLUMN: &str = "_distance";

fn lance_error(action: &str) -> impl Fn(lancedb::Error) -> AppError + '_ {
    move |e| AppError::Retrieval(format!("Failed to {}: {}", action, e))
}

/// Vector index stored in a LanceDB database directory.
pub struct LanceDbVectorIndex {
    conn: Connection,
    dimensions: usize,
    tables: RwLock<HashMap<String, Table>>,
}

impl LanceDbVectorIndex {
    /// Open (or create) the database at `db_path` for vectors of `dimensions`.
    pub async fn connect(db_path: &Path, dimensions: usize) -> AppResult<Self> {
        std::fs::create_dir_all(db_path).map_err(|e| {
            AppError::Retrieval(format!("Failed to create index directory {:?}: {}", db_path, e))
        })?;

        let uri = db_path.to_string_lossy().to_string();
        let conn = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(lance_error("connect to LanceDB"))?;

        tracing::debug!("Opened LanceDB index at {:?} ({} dims)", db_path, dimensions);
        Ok(Self {
            conn,
            dimensions,
            tables: RwLock::new(HashMap::new()),
        })
    }

    fn schema(&self, metadata: HashMap<String, String>) -> Arc<Schema> {
        Arc::new(
            Schema::new(vec![
                Field::new("id", DataType::Utf8, false),
                Field::new("document", DataType::Utf8, false),
                Field::new("metadata", DataType::Utf8, false),
                Field::new(
                    "vector",
                    DataType::FixedSizeList(
                        Arc::new(Field::new("item", DataType::Float32, true)),
                        self.dimensions as i32,
                    ),
                    false,
                ),
            ])
            .with_metadata(metadata),
        )
    }

    /// The table for `name`, or `None` when it was never created.
    async fn table(&self, name: &str) -> AppResult<Option<Table>> {
        if let Some(table) = self.tables.read().await.get(name) {
            return Ok(Some(table.clone()));
        }

        let names = self
            .conn
            .table_names()
            .execute()
            .await
            .map_err(lance_error("list tables"))?;
        if !names.iter().any(|n| n == name) {
            return Ok(None);
        }

        let table = self
            .conn
            .open_table(name)
            .execute()
            .await
            .map_err(lance_error("open table"))?;
        self.tables
            .write()
            .await
            .insert(name.to_string(), table.clone());
        Ok(Some(table))
    }

    async fn require_table(&self, name: &str) -> AppResult<Table> {
        self.table(name).await?.ok_or_else(|| {
            AppError::Retrieval(format!("Collection '{}' does not exist", name))
        })
    }

    /// Build a batch against the table's own schema, collection metadata included.
    fn to_batch(&self, schema: Arc<Schema>, records: &[VectorRecord]) -> AppResult<RecordBatch> {
        let mut values = Vec::with_capacity(records.len() * self.dimensions);
        let mut metadata = Vec::with_capacity(records.len());
        for record in records {
            if record.vector.len() != self.dimensions {
                return Err(AppError::Retrieval(format!(
                    "Vector dimension mismatch for '{}': expected {}, got {}",
                    record.id,
                    self.dimensions,
                    record.vector.len()
                )));
            }
            values.extend_from_slice(&record.vector);
            metadata.push(serde_json::to_string(&record.metadata)?);
        }

        let ids = StringArray::from_iter_values(records.iter().map(|r| r.id.as_str()));
        let documents = StringArray::from_iter_values(records.iter().map(|r| r.document.as_str()));
        let metadata = StringArray::from_iter_values(metadata.iter().map(String::as_str));
        let vectors = FixedSizeListArray::try_new(
            Arc::new(Field::new("item", DataType::Float32, true)),
            self.dimensions as i32,
            Arc::new(Float32Array::from(values)),
            None,
        )
        .map_err(|e| AppError::Retrieval(format!("Failed to build vector column: {}", e)))?;

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(ids),
                Arc::new(documents),
                Arc::new(metadata),
                Arc::new(vectors),
            ],
        )
        .map_err(|e| AppError::Retrieval(format!("Failed to build record batch: {}", e)))
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> AppResult<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| AppError::Retrieval(format!("Invalid {} column", name)))
}

fn hits_from_batch(batch: &RecordBatch) -> AppResult<Vec<VectorHit>> {
    let ids = string_column(batch, "id")?;
    let documents = string_column(batch, "document")?;
    let metadata = string_column(batch, "metadata")?;
    let distances = batch
        .column_by_name(DISTANCE_COLUMN)
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
        .ok_or_else(|| AppError::Retrieval("Missing distance column".to_string()))?;

    let mut hits = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let metadata: Metadata = match serde_json::from_str(metadata.value(row)) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!("Skipping row '{}' with unreadable metadata: {}", ids.value(row), e);
                continue;
            }
        };
        hits.push(VectorHit {
            id: ids.value(row).to_string(),
            document: documents.value(row).to_string(),
            metadata,
            // LanceDB reports squared L2
            distance: (distances.value(row) as f64).max(0.0).sqrt(),
        });
    }
    Ok(hits)
}

#[async_trait::async_trait]
impl VectorIndex for LanceDbVectorIndex {
    async fn create_or_get_collection(&self, name: &str, metadata: Metadata) -> AppResult<()> {
        if self.table(name).await?.is_some() {
            return Ok(());
        }

        // Collection metadata is kept as string pairs on the table schema.
        let schema_metadata = metadata
            .iter()
            .map(|(k, v)| {
                let value = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                (k.clone(), value)
            })
            .collect();
        let schema = self.schema(schema_metadata);
        let empty = RecordBatch::new_empty(schema.clone());

        let table = match self
            .conn
            .create_table(name, RecordBatchIterator::new(vec![Ok(empty)], schema))
            .execute()
            .await
        {
            Ok(table) => {
                tracing::info!("Created collection '{}'", name);
                table
            }
            // another writer created it first
            Err(lancedb::Error::TableAlreadyExists { .. }) => self
                .conn
                .open_table(name)
                .execute()
                .await
                .map_err(lance_error("open table"))?,
            Err(e) => return Err(lance_error("create table")(e)),
        };
        self.tables.write().await.insert(name.to_string(), table);
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> AppResult<()> {
        let Some(table) = self.table(name).await? else {
            return Ok(());
        };
        table
            .delete("id IS NOT NULL")
            .await
            .map_err(lance_error("clear table"))?;
        self.tables.write().await.remove(name);

        tracing::info!("Deleted collection '{}'", name);
        Ok(())
    }

    #[tracing::instrument(skip(self, records), fields(records = records.len()))]
    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> AppResult<Vec<String>> {
        let table = self.require_table(collection).await?;
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let schema = table.schema().await.map_err(lance_error("read table schema"))?;
        let batch = self.to_batch(schema.clone(), &records)?;
        let mut merge = table.merge_insert(&["id"]);
        merge.when_matched_update_all(None).when_not_matched_insert_all();
        merge
            .execute(Box::new(RecordBatchIterator::new(vec![Ok(batch)], schema)))
            .await
            .map_err(lance_error("upsert records"))?;

        tracing::debug!("Upserted {} records into '{}'", records.len(), collection);
        Ok(records.into_iter().map(|r| r.id).collect())
    }

    #[tracing::instrument(skip(self, vector))]
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> AppResult<Vec<VectorHit>> {
        let table = self.require_table(collection).await?;
        if top_k == 0 || table.count_rows(None).await.map_err(lance_error("count rows"))? == 0 {
            return Ok(Vec::new());
        }
        if vector.len() != self.dimensions {
            return Err(AppError::Retrieval(format!(
                "Query dimension mismatch: expected {}, got {}",
                self.dimensions,
                vector.len()
            )));
        }

        let batches: Vec<RecordBatch> = table
            .query()
            .nearest_to(vector.to_vec())
            .map_err(lance_error("build query"))?
            .distance_type(DistanceType::L2)
            .limit(top_k)
            .execute()
            .await
            .map_err(lance_error("execute query"))?
            .try_collect()
            .await
            .map_err(lance_error("collect results"))?;

        let mut hits = Vec::new();
        for batch in &batches {
            hits.extend(hits_from_batch(batch)?);
        }
        // batches are not guaranteed to arrive in distance order
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn count(&self, collection: &str) -> AppResult<usize> {
        match self.table(collection).await? {
            Some(table) => table
                .count_rows(None)
                .await
                .map_err(lance_error("count rows")),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(id: &str, vector: Vec<f32>) -> VectorRecord {
        let mut metadata = Metadata::new();
        metadata.insert("source_file".to_string(), json!(format!("{}.md", id)));
        metadata.insert("chunk_index".to_string(), json!(0));
        VectorRecord {
            id: id.to_string(),
            document: format!("doc {}", id),
            metadata,
            vector,
        }
    }

    async fn seeded(temp: &TempDir) -> LanceDbVectorIndex {
        let index = LanceDbVectorIndex::connect(&temp.path().join("lancedb"), 2)
            .await
            .unwrap();
        index.create_or_get_collection("kb", Metadata::new()).await.unwrap();
        index
            .upsert(
                "kb",
                vec![
                    record("far", vec![10.0, 0.0]),
                    record("near", vec![0.0, 1.0]),
                    record("exact", vec![0.0, 0.0]),
                ],
            )
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn test_query_nearest_first() {
        let temp = TempDir::new().unwrap();
        let index = seeded(&temp).await;

        let hits = index.query("kb", &[0.0, 0.0], 2).await.unwrap();

        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "near"]);
        assert!(hits[0].distance.abs() < 1e-6);
        assert!((hits[1].distance - 1.0).abs() < 1e-4);
        assert_eq!(hits[0].metadata["source_file"], "exact.md");
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let temp = TempDir::new().unwrap();
        let index = seeded(&temp).await;

        let ids = index
            .upsert("kb", vec![record("far", vec![0.5, 0.0]), record("new", vec![3.0, 3.0])])
            .await
            .unwrap();

        assert_eq!(ids, vec!["far", "new"]);
        assert_eq!(index.count("kb").await.unwrap(), 4);
        let hits = index.query("kb", &[0.5, 0.0], 1).await.unwrap();
        assert_eq!(hits[0].id, "far");
    }

    #[tokio::test]
    async fn test_records_survive_reconnect() {
        let temp = TempDir::new().unwrap();
        drop(seeded(&temp).await);

        let reopened = LanceDbVectorIndex::connect(&temp.path().join("lancedb"), 2)
            .await
            .unwrap();
        assert_eq!(reopened.count("kb").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_two_handles_do_not_lose_writes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("lancedb");
        let first = LanceDbVectorIndex::connect(&path, 2).await.unwrap();
        first.create_or_get_collection("kb", Metadata::new()).await.unwrap();
        let second = LanceDbVectorIndex::connect(&path, 2).await.unwrap();

        first.upsert("kb", vec![record("a", vec![1.0, 0.0])]).await.unwrap();
        second.upsert("kb", vec![record("b", vec![0.0, 1.0])]).await.unwrap();

        assert_eq!(first.count("kb").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_missing_collection() {
        let temp = TempDir::new().unwrap();
        let index = LanceDbVectorIndex::connect(&temp.path().join("lancedb"), 2)
            .await
            .unwrap();

        assert!(index.query("nope", &[0.0, 0.0], 1).await.is_err());
        assert_eq!(index.count("nope").await.unwrap(), 0);
        index.delete_collection("nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_rejected() {
        let temp = TempDir::new().unwrap();
        let index = seeded(&temp).await;
        assert!(index.upsert("kb", vec![record("bad", vec![1.0])]).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_collection_clears_records() {
        let temp = TempDir::new().unwrap();
        let index = seeded(&temp).await;
        index.delete_collection("kb").await.unwrap();
        assert_eq!(index.count("kb").await.unwrap(), 0);
    }
}
