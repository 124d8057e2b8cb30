//! LanceDB-backed vector index.
//!
//! Writes upsert by dedup key via `merge_insert`, so re-indexing unchanged
//! passages never duplicates rows. Concurrency guarantees are LanceDB's
//! own; no extra locking is added here.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use arrow_array::{
    FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection};
use serde::Serialize;
use tracing::{info, warn};

use finrag_core::error::Error;
use finrag_core::oracle::EmbeddingOracle;
use finrag_core::types::{Meta, Passage, RetrievalCandidate};

use crate::schema::build_arrow_schema;

pub struct VectorIndex {
    db: Connection,
    table_name: String,
    embedder: Arc<dyn EmbeddingOracle>,
    dim: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct VectorStats {
    pub row_count: usize,
    pub table_name: String,
    pub dim: usize,
}

impl VectorIndex {
    /// Connects to the store and creates the passage table if missing, so a
    /// query against a never-indexed corpus is valid and returns nothing.
    pub async fn open(
        db_path: &Path,
        table_name: &str,
        embedder: Arc<dyn EmbeddingOracle>,
    ) -> Result<Self> {
        let dim = i32::try_from(embedder.dim())
            .map_err(|_| anyhow!("embedding dimension too large"))?;
        let db = connect(db_path.to_string_lossy().as_ref()).execute().await?;
        let index = Self { db, table_name: table_name.to_string(), embedder, dim };
        index.ensure_table().await?;
        Ok(index)
    }

    async fn ensure_table(&self) -> Result<()> {
        let names = self.db.table_names().execute().await?;
        if names.contains(&self.table_name) {
            return Ok(());
        }
        let schema = build_arrow_schema(self.dim);
        let batches: Vec<std::result::Result<RecordBatch, arrow_schema::ArrowError>> = vec![];
        let reader = RecordBatchIterator::new(batches.into_iter(), schema);
        self.db.create_table(&self.table_name, Box::new(reader)).execute().await?;
        Ok(())
    }

    /// Embeds the passages document-side and upserts them by dedup key.
    /// Returns the ids written.
    pub async fn add(&self, passages: &[Passage]) -> Result<Vec<String>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = passages.iter().map(|p| p.content.clone()).collect();
        let embeddings = self
            .embedder
            .embed(&texts)
            .map_err(|e| anyhow::Error::new(Error::Oracle(format!("embed failed: {e}"))))?;
        if embeddings.len() != passages.len() {
            return Err(anyhow!(
                "embedding oracle returned {} vectors for {} passages",
                embeddings.len(),
                passages.len()
            ));
        }
        for embedding in &embeddings {
            if embedding.len() != self.dim as usize {
                return Err(anyhow!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.dim,
                    embedding.len()
                ));
            }
        }

        let ids: Vec<String> = passages.iter().map(Passage::dedup_key).collect();
        let batch = self.to_record_batch(passages, &ids, &embeddings)?;
        let schema = batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));

        let table = self.db.open_table(&self.table_name).execute().await?;
        let mut merge = table.merge_insert(&["id"]);
        merge.when_matched_update_all(None).when_not_matched_insert_all();
        let _ = merge.execute(reader).await?;

        info!(count = ids.len(), table = %self.table_name, "upserted passages into vector table");
        Ok(ids)
    }

    /// ANN search for the `k` nearest passages. The returned raw score is
    /// the store's distance (lower = more similar); it is carried alongside
    /// the candidate so callers never confuse it with a relevance score.
    pub async fn search_with_score(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(RetrievalCandidate, f32)>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self
            .embedder
            .embed_query(query)
            .map_err(|e| anyhow::Error::new(Error::Oracle(format!("embed_query failed: {e}"))))?;

        let table = self.db.open_table(&self.table_name).execute().await?;
        let mut stream = table.vector_search(query_vector)?.limit(k).execute().await?;

        let mut results = Vec::new();
        while let Some(batch) = TryStreamExt::try_next(&mut stream).await? {
            for row in 0..batch.num_rows() {
                let content = string_value(&batch, "content", row)?;
                let metadata = metadata_value(&batch, row);
                let distance = distance_value(&batch, row);
                results.push((
                    RetrievalCandidate {
                        content,
                        metadata,
                        score: distance,
                        rank: results.len() + 1,
                    },
                    distance,
                ));
            }
        }
        Ok(results)
    }

    /// Deletes every row whose source column matches. Errors are logged,
    /// not propagated: the orchestrator treats delete as best-effort.
    pub async fn delete_by_source(&self, source: &str) -> bool {
        match self.try_delete(source).await {
            Ok(()) => {
                info!(source, table = %self.table_name, "deleted rows from vector table");
                true
            }
            Err(e) => {
                warn!(error = %e, source, "vector delete failed");
                false
            }
        }
    }

    async fn try_delete(&self, source: &str) -> Result<()> {
        let table = self.db.open_table(&self.table_name).execute().await?;
        let predicate = format!("source = '{}'", source.replace('\'', "''"));
        table.delete(&predicate).await?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<VectorStats> {
        let table = self.db.open_table(&self.table_name).execute().await?;
        let row_count = table.count_rows(None).await?;
        Ok(VectorStats {
            row_count,
            table_name: self.table_name.clone(),
            dim: self.dim as usize,
        })
    }

    fn to_record_batch(
        &self,
        passages: &[Passage],
        ids: &[String],
        embeddings: &[Vec<f32>],
    ) -> Result<RecordBatch> {
        let schema = build_arrow_schema(self.dim);

        let mut sources = Vec::with_capacity(passages.len());
        let mut page_nums = Vec::with_capacity(passages.len());
        let mut contents = Vec::with_capacity(passages.len());
        let mut metadata_json = Vec::with_capacity(passages.len());
        let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(passages.len());

        for (passage, embedding) in passages.iter().zip(embeddings.iter()) {
            sources.push(passage.source().to_string());
            page_nums.push(passage.page_num());
            contents.push(passage.content.clone());
            metadata_json.push(serde_json::to_string(&passage.metadata)?);
            vectors.push(Some(embedding.iter().map(|&x| Some(x)).collect()));
        }

        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(ids.to_vec())),
                Arc::new(StringArray::from(sources)),
                Arc::new(Int32Array::from(page_nums)),
                Arc::new(StringArray::from(contents)),
                Arc::new(StringArray::from(metadata_json)),
                Arc::new(FixedSizeListArray::from_iter_primitive::<
                    arrow_array::types::Float32Type,
                    _,
                    _,
                >(vectors.into_iter(), self.dim)),
            ],
        )?;
        Ok(batch)
    }
}

fn string_value(batch: &RecordBatch, name: &str, row: usize) -> Result<String> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .map(|a| a.value(row).to_string())
        .ok_or_else(|| anyhow!("column '{name}' missing or not utf8"))
}

/// Caller metadata round-trips through the JSON column; an unreadable cell
/// degrades to an empty map rather than failing the whole query.
fn metadata_value(batch: &RecordBatch, row: usize) -> Meta {
    string_value(batch, "metadata", row)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

fn distance_value(batch: &RecordBatch, row: usize) -> f32 {
    for name in ["_distance", "distance"] {
        if let Some(column) = batch.column_by_name(name) {
            if let Some(values) = column.as_any().downcast_ref::<Float32Array>() {
                return values.value(row);
            }
        }
    }
    // No distance column — treat as mid-range rather than failing the row.
    0.5
}
