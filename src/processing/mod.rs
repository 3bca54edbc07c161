// Document processing pipeline.
// Drives a document through pending -> processing -> completed | failed:
// extract text, chunk, embed, store vectors, persist chunk rows, refresh
// the owning expert's aggregates.

#[cfg(test)]
pub(crate) mod tests;

pub mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chunking::{Chunk, ChunkingLimits, chunk_text};
use crate::database::Database;
use crate::database::models::{ExpertDocument, NewChunk};
use crate::database::queries::{ChunkQueries, DocumentQueries, ExpertQueries};
use crate::embeddings::EmbeddingClient;
use crate::extraction::TextExtractor;
use crate::vector_store::{ChunkMetadata, NewVectorEntry, VectorStoreClient};
use crate::{KbError, Result};

/// Runs the indexing pipeline for single documents. All collaborators are
/// injected, so tests can swap in fakes for extraction and embedding.
pub struct DocumentProcessor {
    database: Database,
    vector_store: Arc<VectorStoreClient>,
    embedder: EmbeddingClient,
    extractor: Arc<dyn TextExtractor>,
    chunking: ChunkingLimits,
}

impl DocumentProcessor {
    #[inline]
    pub fn new(
        database: Database,
        vector_store: Arc<VectorStoreClient>,
        embedder: EmbeddingClient,
        extractor: Arc<dyn TextExtractor>,
        chunking: ChunkingLimits,
    ) -> Self {
        Self {
            database,
            vector_store,
            embedder,
            extractor,
            chunking,
        }
    }

    /// Process a pending document start to finish.
    ///
    /// The `pending -> processing` transition is claimed exactly once;
    /// losing the claim is a no-op. Pipeline failures are recorded on the
    /// document (`status=failed`, `error_message`) and do not propagate:
    /// callers observe the outcome by polling the document's status.
    #[inline]
    pub async fn process_document(&self, document_id: i64) -> Result<()> {
        let pool = self.database.pool();

        let Some(document) = DocumentQueries::get_by_id(pool, document_id).await? else {
            return Err(KbError::Database(format!(
                "Document {document_id} not found"
            )));
        };

        if !DocumentQueries::claim_processing(pool, document_id).await? {
            warn!(
                "Document {} is not pending (status: {}), skipping",
                document_id, document.status
            );
            return Ok(());
        }

        info!("Processing document {} ({})", document.id, document.name);

        match self.run_pipeline(&document).await {
            Ok(chunk_count) => {
                info!(
                    "Successfully processed document {}: {} chunks",
                    document.name, chunk_count
                );
                Ok(())
            }
            Err(e) => {
                error!("Error processing document {}: {}", document.name, e);
                DocumentQueries::mark_failed(pool, document.id, &e.to_string()).await?;
                Ok(())
            }
        }
    }

    /// Wipe a document's chunks and vector entries, then run the full
    /// pipeline again. The sole recovery path for failed documents, and
    /// the sanctioned way to reconcile the vector index with the chunk
    /// rows.
    #[inline]
    pub async fn reprocess_document(&self, document_id: i64) -> Result<()> {
        let pool = self.database.pool();

        let Some(document) = DocumentQueries::get_by_id(pool, document_id).await? else {
            return Err(KbError::Database(format!(
                "Document {document_id} not found"
            )));
        };

        info!("Reprocessing document {} ({})", document.id, document.name);

        let deleted = ChunkQueries::delete_for_document(pool, document.id).await?;
        debug!("Deleted {} chunk rows for document {}", deleted, document.id);

        self.vector_store
            .delete_document(document.expert_id, document.id)
            .await?;

        DocumentQueries::reset_for_reprocess(pool, document.id).await?;
        ExpertQueries::recompute_counts(pool, document.expert_id).await?;

        self.process_document(document_id).await
    }

    async fn run_pipeline(&self, document: &ExpertDocument) -> Result<usize> {
        let pool = self.database.pool();

        // 1. Extract text and page count
        debug!("Extracting text from {}", document.name);
        let extractor = Arc::clone(&self.extractor);
        let file_path = PathBuf::from(&document.file_path);
        let file_type = document.file_type;
        let extracted =
            tokio::task::spawn_blocking(move || extractor.extract(&file_path, file_type))
                .await
                .map_err(|e| KbError::Other(anyhow!("extraction task failed: {e}")))??;

        if extracted.text.trim().is_empty() {
            return Err(KbError::EmptyDocument);
        }

        DocumentQueries::set_page_count(pool, document.id, i64::from(extracted.page_count)).await?;

        // 2. Chunk the text
        debug!("Chunking document {}", document.name);
        let chunks = chunk_text(&extracted.text, &self.chunking);
        if chunks.is_empty() {
            return Err(KbError::NoChunks);
        }

        // 3. Embed all chunk texts in one logical call
        debug!("Embedding {} chunks for {}", chunks.len(), document.name);
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embedder = self.embedder.clone();
        let embeddings = tokio::task::spawn_blocking(move || embedder.embed(&texts))
            .await
            .map_err(|e| KbError::Other(anyhow!("embedding task failed: {e}")))??;

        // 4. Upsert into the expert's vector index under fresh ids
        let entries: Vec<NewVectorEntry> = chunks
            .iter()
            .zip(embeddings)
            .enumerate()
            .map(|(index, (chunk, embedding))| NewVectorEntry {
                vector_id: new_vector_id(document.id, index),
                embedding,
                content: chunk.content.clone(),
                metadata: ChunkMetadata {
                    document_id: document.id,
                    chunk_index: index as u32,
                    page_number: chunk.page_number,
                },
            })
            .collect();

        debug!("Storing {} vector entries", entries.len());
        self.vector_store
            .upsert_chunks(document.expert_id, &entries)
            .await?;

        // 5. Persist chunk rows in chunk_index order
        let chunk_rows: Vec<_> = chunks
            .iter()
            .zip(&entries)
            .enumerate()
            .map(|(index, (chunk, entry))| new_chunk_row(document.id, index, chunk, &entry.vector_id))
            .collect();
        ChunkQueries::insert_batch(pool, &chunk_rows).await?;

        // 6. Mark the document completed
        DocumentQueries::mark_completed(pool, document.id, chunks.len() as i64).await?;

        // 7. Refresh the owning expert's aggregates from scratch
        ExpertQueries::recompute_counts(pool, document.expert_id).await?;

        Ok(chunks.len())
    }
}

/// Globally-unique vector-store id for one chunk of a document.
fn new_vector_id(document_id: i64, chunk_index: usize) -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
    format!("doc_{document_id}_chunk_{chunk_index}_{suffix}")
}

fn new_chunk_row(
    document_id: i64,
    chunk_index: usize,
    chunk: &Chunk,
    vector_id: &str,
) -> NewChunk {
    NewChunk {
        document_id,
        chunk_index: chunk_index as i64,
        content: chunk.content.clone(),
        page_number: chunk.page_number.map(i64::from),
        vector_id: vector_id.to_string(),
    }
}
