#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use super::models::{
    DEFAULT_SYSTEM_PROMPT, DocumentChunk, Expert, ExpertDocument, NewChunk, NewDocument, NewExpert,
};
use crate::extraction::FileType;

pub struct ExpertQueries;

impl ExpertQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_expert: NewExpert) -> Result<Expert> {
        let now = Utc::now().naive_utc();
        let system_prompt = new_expert
            .system_prompt
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        let id = sqlx::query(
            "INSERT INTO experts (owner_id, name, description, system_prompt, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(new_expert.owner_id)
        .bind(&new_expert.name)
        .bind(&new_expert.description)
        .bind(&system_prompt)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create expert")?
        .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created expert"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Expert>> {
        sqlx::query_as::<_, Expert>("SELECT * FROM experts WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to get expert by id")
    }

    #[inline]
    pub async fn list_for_owner(pool: &SqlitePool, owner_id: i64) -> Result<Vec<Expert>> {
        sqlx::query_as::<_, Expert>("SELECT * FROM experts WHERE owner_id = ? ORDER BY name")
            .bind(owner_id)
            .fetch_all(pool)
            .await
            .context("Failed to list experts")
    }

    #[inline]
    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM experts WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to delete expert")?;

        Ok(result.rows_affected() > 0)
    }

    /// Recompute `document_count`, `chunk_count` and `is_indexed` from
    /// scratch, counting only completed documents. Aggregates are never
    /// patched incrementally: a crash mid-pipeline could otherwise leave
    /// them stale.
    #[inline]
    pub async fn recompute_counts(pool: &SqlitePool, expert_id: i64) -> Result<()> {
        let document_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM documents WHERE expert_id = ? AND status = 'completed'",
        )
        .bind(expert_id)
        .fetch_one(pool)
        .await
        .context("Failed to count completed documents")?;

        let chunk_count: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(chunk_count), 0) FROM documents WHERE expert_id = ? AND status = 'completed'",
        )
        .bind(expert_id)
        .fetch_one(pool)
        .await
        .context("Failed to sum chunk counts")?;

        sqlx::query(
            "UPDATE experts SET document_count = ?, chunk_count = ?, is_indexed = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(document_count)
        .bind(chunk_count)
        .bind(chunk_count > 0)
        .bind(Utc::now().naive_utc())
        .bind(expert_id)
        .execute(pool)
        .await
        .context("Failed to update expert counts")?;

        debug!(
            "Recomputed counts for expert {}: {} documents, {} chunks",
            expert_id, document_count, chunk_count
        );
        Ok(())
    }
}

pub struct DocumentQueries;

impl DocumentQueries {
    #[inline]
    pub async fn create(
        pool: &SqlitePool,
        new_document: NewDocument,
        file_type: FileType,
    ) -> Result<ExpertDocument> {
        let now = Utc::now().naive_utc();
        let id = sqlx::query(
            "INSERT INTO documents (expert_id, name, file_path, file_type, file_size, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 'pending', ?, ?)",
        )
        .bind(new_document.expert_id)
        .bind(&new_document.name)
        .bind(&new_document.file_path)
        .bind(file_type)
        .bind(new_document.file_size)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create document")?
        .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created document"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<ExpertDocument>> {
        sqlx::query_as::<_, ExpertDocument>("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to get document by id")
    }

    #[inline]
    pub async fn list_for_expert(pool: &SqlitePool, expert_id: i64) -> Result<Vec<ExpertDocument>> {
        sqlx::query_as::<_, ExpertDocument>(
            "SELECT * FROM documents WHERE expert_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(expert_id)
        .fetch_all(pool)
        .await
        .context("Failed to list documents")
    }

    /// Claim the `pending -> processing` transition. Returns `false` when
    /// the document was not pending, so concurrent runs cannot both enter
    /// the pipeline for the same document.
    #[inline]
    pub async fn claim_processing(pool: &SqlitePool, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE documents SET status = 'processing', updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(Utc::now().naive_utc())
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to claim document for processing")?;

        Ok(result.rows_affected() == 1)
    }

    #[inline]
    pub async fn set_page_count(pool: &SqlitePool, id: i64, page_count: i64) -> Result<()> {
        sqlx::query("UPDATE documents SET page_count = ?, updated_at = ? WHERE id = ?")
            .bind(page_count)
            .bind(Utc::now().naive_utc())
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to set page count")?;
        Ok(())
    }

    #[inline]
    pub async fn mark_completed(pool: &SqlitePool, id: i64, chunk_count: i64) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET status = 'completed', chunk_count = ?, error_message = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(chunk_count)
        .bind(Utc::now().naive_utc())
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to mark document completed")?;
        Ok(())
    }

    #[inline]
    pub async fn mark_failed(pool: &SqlitePool, id: i64, error_message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET status = 'failed', error_message = ?, updated_at = ? WHERE id = ?",
        )
        .bind(error_message)
        .bind(Utc::now().naive_utc())
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to mark document failed")?;
        Ok(())
    }

    /// Reset lifecycle state so the full pipeline can run again.
    #[inline]
    pub async fn reset_for_reprocess(pool: &SqlitePool, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET status = 'pending', chunk_count = 0, error_message = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(Utc::now().naive_utc())
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to reset document for reprocessing")?;
        Ok(())
    }

    #[inline]
    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to delete document")?;

        Ok(result.rows_affected() > 0)
    }
}

pub struct ChunkQueries;

impl ChunkQueries {
    /// Insert a document's chunks in one transaction, in chunk_index order.
    #[inline]
    pub async fn insert_batch(pool: &SqlitePool, chunks: &[NewChunk]) -> Result<()> {
        let mut tx = pool.begin().await.context("Failed to begin transaction")?;
        let now = Utc::now().naive_utc();

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (document_id, chunk_index, content, page_number, vector_id, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(chunk.page_number)
            .bind(&chunk.vector_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to insert chunk")?;
        }

        tx.commit().await.context("Failed to commit chunk batch")?;
        debug!("Inserted {} chunk rows", chunks.len());
        Ok(())
    }

    #[inline]
    pub async fn list_for_document(pool: &SqlitePool, document_id: i64) -> Result<Vec<DocumentChunk>> {
        sqlx::query_as::<_, DocumentChunk>(
            "SELECT * FROM chunks WHERE document_id = ? ORDER BY chunk_index",
        )
        .bind(document_id)
        .fetch_all(pool)
        .await
        .context("Failed to list chunks")
    }

    #[inline]
    pub async fn get_by_vector_id(pool: &SqlitePool, vector_id: &str) -> Result<Option<DocumentChunk>> {
        sqlx::query_as::<_, DocumentChunk>("SELECT * FROM chunks WHERE vector_id = ?")
            .bind(vector_id)
            .fetch_optional(pool)
            .await
            .context("Failed to get chunk by vector id")
    }

    #[inline]
    pub async fn delete_for_document(pool: &SqlitePool, document_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(pool)
            .await
            .context("Failed to delete chunks")?;

        Ok(result.rows_affected())
    }
}
