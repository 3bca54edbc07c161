use thiserror::Error;

pub type Result<T> = std::result::Result<T, KbError>;

/// Error taxonomy for the knowledge-base pipeline.
///
/// Pipeline-stage errors (`Extraction`, `EmptyDocument`, `NoChunks`,
/// `EmbeddingService`, `VectorStore`) are caught at the processing boundary
/// and recorded on the document; retrieval-path errors propagate to the
/// caller of `answer`.
#[derive(Error, Debug)]
pub enum KbError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Text extraction failed: {0}")]
    Extraction(String),

    /// User-facing message, persisted as the document's `error_message`.
    #[error("Keine Textinhalte im Dokument gefunden")]
    EmptyDocument,

    /// User-facing message, persisted as the document's `error_message`.
    #[error("Keine Chunks aus dem Dokument erstellt")]
    NoChunks,

    #[error("Embedding service error: {detail}")]
    EmbeddingService { status: Option<u16>, detail: String },

    #[error("Generation service error: {detail}")]
    GenerationService { status: Option<u16>, detail: String },

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod chunking;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod extraction;
pub mod generation;
pub mod processing;
pub mod rag;
pub mod service;
pub mod vector_store;
