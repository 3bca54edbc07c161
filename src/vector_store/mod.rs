// LanceDB-backed vector index.
// Each expert maps to one physical table, so no query bug can leak results
// across collections.


use std::path::PathBuf;
use std::sync::Arc;

use arrow::array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatchIterator, StringArray,
    UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType,
    query::{ExecutableQuery, QueryBase},
    table::Table,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::{KbError, Result};

/// Typed chunk metadata stored alongside each vector. Validated at the
/// upsert boundary so malformed entries fail fast instead of corrupting
/// later queries. Sufficient to cite a chunk without a relational join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub document_id: i64,
    pub chunk_index: u32,
    pub page_number: Option<u32>,
}

/// A chunk entry to be written to an expert's index.
#[derive(Debug, Clone, PartialEq)]
pub struct NewVectorEntry {
    pub vector_id: String,
    pub embedding: Vec<f32>,
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// Query hit, ordered by ascending cosine distance. `similarity` rescales
/// distance from `[0, 2]` to `[0, 1]`, higher meaning more relevant.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub vector_id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub distance: f32,
    pub similarity: f32,
}

/// Handle to the per-collection vector indexes. Explicitly constructed and
/// passed by reference to the pipeline and the RAG orchestrator; persists
/// under the configured directory across restarts.
pub struct VectorStoreClient {
    connection: Connection,
    dimension: usize,
}

impl VectorStoreClient {
    #[inline]
    pub async fn open(config: &Config) -> Result<Self> {
        let db_path: PathBuf = config.vector_database_path();
        debug!("Initializing LanceDB at path: {:?}", db_path);

        std::fs::create_dir_all(&db_path).map_err(|e| {
            KbError::VectorStore(format!("Failed to create vector database directory: {e}"))
        })?;

        let uri = format!("file://{}", db_path.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| KbError::VectorStore(format!("Failed to connect to LanceDB: {e}")))?;

        info!("Vector store initialized at {:?}", db_path);
        Ok(Self {
            connection,
            dimension: config.embedding.dimension as usize,
        })
    }

    /// Deterministic physical table name for an expert's index.
    #[inline]
    pub fn table_name(expert_id: i64) -> String {
        format!("expert_{expert_id}")
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("vector_id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    self.dimension as i32,
                ),
                false,
            ),
            Field::new("content", DataType::Utf8, false),
            Field::new("document_id", DataType::Int64, false),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("page_number", DataType::UInt32, true),
        ]))
    }

    async fn table_exists(&self, table_name: &str) -> Result<bool> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| KbError::VectorStore(format!("Failed to list tables: {e}")))?;

        Ok(table_names.iter().any(|name| name == table_name))
    }

    async fn open_table(&self, table_name: &str) -> Result<Table> {
        self.connection
            .open_table(table_name)
            .execute()
            .await
            .map_err(|e| KbError::VectorStore(format!("Failed to open table {table_name}: {e}")))
    }

    async fn get_or_create_table(&self, expert_id: i64) -> Result<Table> {
        let table_name = Self::table_name(expert_id);

        if self.table_exists(&table_name).await? {
            return self.open_table(&table_name).await;
        }

        debug!("Creating vector table {table_name}");
        self.connection
            .create_empty_table(&table_name, self.schema())
            .execute()
            .await
            .map_err(|e| {
                KbError::VectorStore(format!("Failed to create table {table_name}: {e}"))
            })
    }

    fn validate_entries(&self, entries: &[NewVectorEntry]) -> Result<()> {
        for entry in entries {
            if entry.vector_id.is_empty() {
                return Err(KbError::VectorStore(
                    "Vector entry has an empty vector_id".to_string(),
                ));
            }
            if entry.embedding.len() != self.dimension {
                return Err(KbError::VectorStore(format!(
                    "Vector entry {} has dimension {}, expected {}",
                    entry.vector_id,
                    entry.embedding.len(),
                    self.dimension
                )));
            }
            if entry.metadata.document_id <= 0 {
                return Err(KbError::VectorStore(format!(
                    "Vector entry {} references invalid document id {}",
                    entry.vector_id, entry.metadata.document_id
                )));
            }
        }
        Ok(())
    }

    fn create_record_batch(&self, entries: &[NewVectorEntry]) -> Result<RecordBatch> {
        let len = entries.len();

        let mut vector_ids = Vec::with_capacity(len);
        let mut contents = Vec::with_capacity(len);
        let mut document_ids = Vec::with_capacity(len);
        let mut chunk_indices = Vec::with_capacity(len);
        let mut page_numbers = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * self.dimension);

        for entry in entries {
            vector_ids.push(entry.vector_id.as_str());
            contents.push(entry.content.as_str());
            document_ids.push(entry.metadata.document_id);
            chunk_indices.push(entry.metadata.chunk_index);
            page_numbers.push(entry.metadata.page_number);
            flat_values.extend_from_slice(&entry.embedding);
        }

        let values_array = Float32Array::from(flat_values);
        let item_field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            item_field,
            self.dimension as i32,
            Arc::new(values_array),
            None,
        )
        .map_err(|e| KbError::VectorStore(format!("Failed to create vector array: {e}")))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(vector_ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(contents)),
            Arc::new(Int64Array::from(document_ids)),
            Arc::new(UInt32Array::from(chunk_indices)),
            Arc::new(UInt32Array::from(page_numbers)),
        ];

        RecordBatch::try_new(self.schema(), arrays)
            .map_err(|e| KbError::VectorStore(format!("Failed to create record batch: {e}")))
    }

    /// Add or replace entries in an expert's index. The whole batch is
    /// written in a single call, so a reader never sees it half-applied.
    #[inline]
    pub async fn upsert_chunks(&self, expert_id: i64, entries: &[NewVectorEntry]) -> Result<()> {
        if entries.is_empty() {
            debug!("No vector entries to store");
            return Ok(());
        }

        self.validate_entries(entries)?;

        let table = self.get_or_create_table(expert_id).await?;

        // Replace semantics: drop any previous entries with the same ids
        let id_list = entries
            .iter()
            .map(|e| format!("'{}'", e.vector_id.replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(", ");
        table
            .delete(&format!("vector_id IN ({id_list})"))
            .await
            .map_err(|e| KbError::VectorStore(format!("Failed to replace entries: {e}")))?;

        let record_batch = self.create_record_batch(entries)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);

        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| KbError::VectorStore(format!("Failed to insert embeddings: {e}")))?;

        info!(
            "Stored {} vector entries for expert {}",
            entries.len(),
            expert_id
        );
        Ok(())
    }

    /// Similarity query with a relevance threshold on cosine distance.
    ///
    /// Only candidates with `distance <= relevance_threshold` are returned,
    /// except that when fewer than `min_results` clear the bar and any
    /// candidate exists, the top `min_results` by distance are returned
    /// regardless. Retrieval never comes back empty merely because nothing
    /// cleared an arbitrary bar when at least something exists.
    #[inline]
    pub async fn query(
        &self,
        expert_id: i64,
        query_vector: &[f32],
        max_candidates: usize,
        relevance_threshold: f32,
        min_results: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let table_name = Self::table_name(expert_id);
        if !self.table_exists(&table_name).await? {
            debug!("No vector table for expert {expert_id}, returning no results");
            return Ok(Vec::new());
        }

        let table = self.open_table(&table_name).await?;

        let results = table
            .vector_search(query_vector)
            .map_err(|e| KbError::VectorStore(format!("Failed to create vector search: {e}")))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(max_candidates)
            .execute()
            .await
            .map_err(|e| KbError::VectorStore(format!("Failed to execute search: {e}")))?;

        let mut candidates = self.parse_search_results(results).await?;
        candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance));

        let relevant_count = candidates
            .iter()
            .filter(|c| c.distance <= relevance_threshold)
            .count();

        let chunks: Vec<ScoredChunk> = if relevant_count < min_results && !candidates.is_empty() {
            // Threshold too strict: fall back to the best available
            candidates.into_iter().take(min_results).collect()
        } else {
            candidates
                .into_iter()
                .filter(|c| c.distance <= relevance_threshold)
                .collect()
        };

        debug!(
            "Query for expert {} returned {} chunks within threshold {}",
            expert_id,
            chunks.len(),
            relevance_threshold
        );
        Ok(chunks)
    }

    async fn parse_search_results(
        &self,
        mut results: lancedb::arrow::SendableRecordBatchStream,
    ) -> Result<Vec<ScoredChunk>> {
        let mut chunks = Vec::new();

        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| KbError::VectorStore(format!("Failed to read result stream: {e}")))?
        {
            chunks.extend(parse_search_batch(&batch)?);
        }

        Ok(chunks)
    }

    /// Remove every entry whose metadata references the given document.
    /// Used when a document is deleted or reprocessed.
    #[inline]
    pub async fn delete_document(&self, expert_id: i64, document_id: i64) -> Result<()> {
        let table_name = Self::table_name(expert_id);
        if !self.table_exists(&table_name).await? {
            return Ok(());
        }

        let table = self.open_table(&table_name).await?;
        table
            .delete(&format!("document_id = {document_id}"))
            .await
            .map_err(|e| {
                KbError::VectorStore(format!("Failed to delete document entries: {e}"))
            })?;

        info!(
            "Deleted vector entries of document {} for expert {}",
            document_id, expert_id
        );
        Ok(())
    }

    /// Drop the expert's entire index. Idempotent.
    #[inline]
    pub async fn delete_expert(&self, expert_id: i64) -> Result<()> {
        let table_name = Self::table_name(expert_id);
        if !self.table_exists(&table_name).await? {
            return Ok(());
        }

        self.connection
            .drop_table(&table_name)
            .await
            .map_err(|e| KbError::VectorStore(format!("Failed to drop table {table_name}: {e}")))?;

        info!("Deleted vector index for expert {expert_id}");
        Ok(())
    }

    /// Total entries in an expert's index.
    #[inline]
    pub async fn count_entries(&self, expert_id: i64) -> Result<u64> {
        let table_name = Self::table_name(expert_id);
        if !self.table_exists(&table_name).await? {
            return Ok(0);
        }

        let table = self.open_table(&table_name).await?;
        let count = table
            .count_rows(None)
            .await
            .map_err(|e| KbError::VectorStore(format!("Failed to count rows: {e}")))?;

        Ok(count as u64)
    }
}

fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<ScoredChunk>> {
    let num_rows = batch.num_rows();
    let mut chunks = Vec::with_capacity(num_rows);

    let vector_ids = string_column(batch, "vector_id")?;
    let contents = string_column(batch, "content")?;

    let document_ids = batch
        .column_by_name("document_id")
        .and_then(|col| col.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| KbError::VectorStore("Missing document_id column".to_string()))?;

    let chunk_indices = batch
        .column_by_name("chunk_index")
        .and_then(|col| col.as_any().downcast_ref::<UInt32Array>())
        .ok_or_else(|| KbError::VectorStore("Missing chunk_index column".to_string()))?;

    let page_numbers = batch
        .column_by_name("page_number")
        .and_then(|col| col.as_any().downcast_ref::<UInt32Array>())
        .ok_or_else(|| KbError::VectorStore("Missing page_number column".to_string()))?;

    let distances = batch
        .column_by_name("_distance")
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

    for row in 0..num_rows {
        let distance = distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });
        // Cosine distance lives in [0, 2]; rescale to a [0, 1] similarity
        let similarity = (1.0 - distance / 2.0).clamp(0.0, 1.0);

        chunks.push(ScoredChunk {
            vector_id: vector_ids.value(row).to_string(),
            content: contents.value(row).to_string(),
            metadata: ChunkMetadata {
                document_id: document_ids.value(row),
                chunk_index: chunk_indices.value(row),
                page_number: if page_numbers.is_null(row) {
                    None
                } else {
                    Some(page_numbers.value(row))
                },
            },
            distance,
            similarity,
        });
    }

    Ok(chunks)
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|col| col.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| KbError::VectorStore(format!("Missing {name} column")))
}
