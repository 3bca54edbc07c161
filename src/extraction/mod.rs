// Text extraction from uploaded files.
// Paginated formats get a `[Seite N]` marker at the start of each page so
// the chunker can recover page numbers after chunking.


use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{KbError, Result};

/// Supported document file types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Txt,
}

impl fmt::Display for FileType {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            FileType::Pdf => write!(f, "pdf"),
            FileType::Txt => write!(f, "txt"),
        }
    }
}

impl FromStr for FileType {
    type Err = KbError;

    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        match s.trim_start_matches('.').to_lowercase().as_str() {
            "pdf" => Ok(FileType::Pdf),
            "txt" => Ok(FileType::Txt),
            other => Err(KbError::Extraction(format!(
                "Unsupported file type: {other}"
            ))),
        }
    }
}

impl FileType {
    /// Detect the file type from a file name's extension.
    #[inline]
    pub fn from_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?;
        ext.parse().ok()
    }
}

/// Raw text plus page count as returned by an extraction backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    pub page_count: u32,
}

/// Extraction collaborator boundary. The default backend reads real files;
/// tests inject fakes.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path, file_type: FileType) -> Result<ExtractedText>;
}

/// Default extractor dispatching on file type.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileExtractor;

impl TextExtractor for FileExtractor {
    #[inline]
    fn extract(&self, path: &Path, file_type: FileType) -> Result<ExtractedText> {
        match file_type {
            FileType::Pdf => extract_pdf(path),
            FileType::Txt => extract_txt(path),
        }
    }
}

fn extract_pdf(path: &Path) -> Result<ExtractedText> {
    let pages = pdf_extract::extract_text_by_pages(path)
        .map_err(|e| KbError::Extraction(format!("Failed to read PDF {}: {e}", path.display())))?;

    let page_count = pages.len() as u32;
    let mut text_parts = Vec::with_capacity(pages.len());

    for (page_index, page_text) in pages.iter().enumerate() {
        if !page_text.trim().is_empty() {
            text_parts.push(format!("[Seite {}]\n{}", page_index + 1, page_text));
        }
    }

    debug!(
        "Extracted {} pages from PDF {}",
        page_count,
        path.display()
    );

    Ok(ExtractedText {
        text: text_parts.join("\n\n"),
        page_count,
    })
}

fn extract_txt(path: &Path) -> Result<ExtractedText> {
    let bytes = std::fs::read(path)?;

    // UTF-8 first, Latin-1 as the fallback for legacy uploads
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
    };

    Ok(ExtractedText {
        text,
        page_count: 1,
    })
}
