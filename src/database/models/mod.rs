
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

use crate::extraction::FileType;

pub const DEFAULT_SYSTEM_PROMPT: &str = "Du bist ein hilfreicher Experte. Beantworte Fragen basierend auf den bereitgestellten Dokumenten. Zitiere relevante Quellen.";

/// A knowledge expert: an isolated collection of documents with its own
/// vector index and persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Expert {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub is_indexed: bool,
    pub document_count: i64,
    pub chunk_count: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewExpert {
    pub owner_id: i64,
    pub name: String,
    pub description: String,
    /// Defaults to [`DEFAULT_SYSTEM_PROMPT`] when not given.
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for DocumentStatus {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            DocumentStatus::Pending => write!(f, "pending"),
            DocumentStatus::Processing => write!(f, "processing"),
            DocumentStatus::Completed => write!(f, "completed"),
            DocumentStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A source document owned by exactly one expert. Only the processing
/// state machine mutates its lifecycle fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ExpertDocument {
    pub id: i64,
    pub expert_id: i64,
    pub name: String,
    pub file_path: String,
    pub file_type: FileType,
    pub file_size: i64,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    pub page_count: i64,
    pub chunk_count: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl ExpertDocument {
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.status == DocumentStatus::Completed
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        self.status == DocumentStatus::Failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    pub expert_id: i64,
    pub name: String,
    pub file_path: String,
    /// Detected from the file name when not given.
    pub file_type: Option<FileType>,
    pub file_size: i64,
}

/// A text chunk persisted once embedding succeeded. `chunk_index` defines
/// retrieval ordering; `vector_id` links to the vector-store entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DocumentChunk {
    pub id: i64,
    pub document_id: i64,
    pub chunk_index: i64,
    pub content: String,
    pub page_number: Option<i64>,
    pub vector_id: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChunk {
    pub document_id: i64,
    pub chunk_index: i64,
    pub content: String,
    pub page_number: Option<i64>,
    pub vector_id: String,
}
