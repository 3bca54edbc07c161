// High-level knowledge-base service.
// The surface the enclosing application calls for upload, delete,
// reprocess and question answering. HTTP routing, auth and file-upload
// handling live outside this crate.


use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::database::Database;
use crate::database::models::{Expert, ExpertDocument, NewDocument, NewExpert};
use crate::database::queries::{DocumentQueries, ExpertQueries};
use crate::embeddings::EmbeddingClient;
use crate::extraction::{FileExtractor, FileType, TextExtractor};
use crate::generation::{ChatMessage, GenerationClient};
use crate::processing::DocumentProcessor;
use crate::rag::{RagAnswer, RagEngine};
use crate::vector_store::VectorStoreClient;
use crate::{KbError, Result};

pub struct KnowledgeBase {
    database: Database,
    vector_store: Arc<VectorStoreClient>,
    processor: Arc<DocumentProcessor>,
    rag: RagEngine,
}

impl KnowledgeBase {
    /// Open all stores and clients from the given configuration.
    #[inline]
    pub async fn open(config: &Config) -> Result<Self> {
        Self::open_with_extractor(config, Arc::new(FileExtractor)).await
    }

    /// Like [`open`](Self::open), with a custom extraction backend.
    #[inline]
    pub async fn open_with_extractor(
        config: &Config,
        extractor: Arc<dyn TextExtractor>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.base_dir)?;
        let database = Database::new(config.database_path()).await?;
        let vector_store = Arc::new(VectorStoreClient::open(config).await?);
        let embedder = EmbeddingClient::new(&config.embedding)?;
        let generator = GenerationClient::new(&config.generation)?;

        let processor = Arc::new(DocumentProcessor::new(
            database.clone(),
            Arc::clone(&vector_store),
            embedder.clone(),
            extractor,
            config.chunking.clone(),
        ));

        let rag = RagEngine::new(
            database.clone(),
            Arc::clone(&vector_store),
            embedder,
            generator,
            config.retrieval.clone(),
        );

        Ok(Self {
            database,
            vector_store,
            processor,
            rag,
        })
    }

    /// The document processor, shareable with a background worker.
    #[inline]
    pub fn processor(&self) -> Arc<DocumentProcessor> {
        Arc::clone(&self.processor)
    }

    #[inline]
    pub fn database(&self) -> &Database {
        &self.database
    }

    #[inline]
    pub async fn create_expert(&self, new_expert: NewExpert) -> Result<Expert> {
        Ok(ExpertQueries::create(self.database.pool(), new_expert).await?)
    }

    #[inline]
    pub async fn get_expert(&self, expert_id: i64) -> Result<Option<Expert>> {
        Ok(ExpertQueries::get_by_id(self.database.pool(), expert_id).await?)
    }

    #[inline]
    pub async fn list_experts(&self, owner_id: i64) -> Result<Vec<Expert>> {
        Ok(ExpertQueries::list_for_owner(self.database.pool(), owner_id).await?)
    }

    /// Delete an expert with its documents, chunk rows and vector index.
    #[inline]
    pub async fn delete_expert(&self, expert_id: i64) -> Result<bool> {
        self.vector_store.delete_expert(expert_id).await?;
        let deleted = ExpertQueries::delete(self.database.pool(), expert_id).await?;

        if deleted {
            info!("Deleted expert {expert_id}");
        }
        Ok(deleted)
    }

    /// Register an uploaded document. It starts out `pending`; queue it on
    /// a worker (or call [`process_document`](Self::process_document)) to
    /// index it.
    #[inline]
    pub async fn add_document(&self, new_document: NewDocument) -> Result<ExpertDocument> {
        if ExpertQueries::get_by_id(self.database.pool(), new_document.expert_id)
            .await?
            .is_none()
        {
            return Err(KbError::Database(format!(
                "Expert {} not found",
                new_document.expert_id
            )));
        }

        let file_type = match new_document.file_type {
            Some(file_type) => file_type,
            None => FileType::from_name(&new_document.name).ok_or_else(|| {
                KbError::Extraction(format!("Unsupported file type: {}", new_document.name))
            })?,
        };

        let document =
            DocumentQueries::create(self.database.pool(), new_document, file_type).await?;
        info!("Registered document {} ({})", document.id, document.name);
        Ok(document)
    }

    #[inline]
    pub async fn process_document(&self, document_id: i64) -> Result<()> {
        self.processor.process_document(document_id).await
    }

    #[inline]
    pub async fn reprocess_document(&self, document_id: i64) -> Result<()> {
        self.processor.reprocess_document(document_id).await
    }

    /// The polling surface for pipeline outcomes.
    #[inline]
    pub async fn document_status(&self, document_id: i64) -> Result<Option<ExpertDocument>> {
        Ok(DocumentQueries::get_by_id(self.database.pool(), document_id).await?)
    }

    #[inline]
    pub async fn list_documents(&self, expert_id: i64) -> Result<Vec<ExpertDocument>> {
        Ok(DocumentQueries::list_for_expert(self.database.pool(), expert_id).await?)
    }

    /// Delete a document with its chunk rows and vector entries, then
    /// refresh the expert's aggregates.
    #[inline]
    pub async fn delete_document(&self, document_id: i64) -> Result<bool> {
        let Some(document) = DocumentQueries::get_by_id(self.database.pool(), document_id).await?
        else {
            return Ok(false);
        };

        self.vector_store
            .delete_document(document.expert_id, document.id)
            .await?;
        let deleted = DocumentQueries::delete(self.database.pool(), document.id).await?;
        ExpertQueries::recompute_counts(self.database.pool(), document.expert_id).await?;

        if deleted {
            info!("Deleted document {} ({})", document.id, document.name);
        }
        Ok(deleted)
    }

    /// Answer a question against an expert's documents.
    #[inline]
    pub async fn ask(
        &self,
        expert_id: i64,
        question: &str,
        history: &[ChatMessage],
        model_override: Option<&str>,
    ) -> Result<RagAnswer> {
        let Some(expert) = ExpertQueries::get_by_id(self.database.pool(), expert_id).await? else {
            return Err(KbError::Database(format!("Expert {expert_id} not found")));
        };

        self.rag
            .answer(&expert, question, history, model_override)
            .await
    }
}
