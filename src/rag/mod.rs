// Retrieval-augmented generation.
// Embeds the question, retrieves the most relevant chunks from the
// expert's index, and feeds them with conversation context into the
// generation collaborator.


use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::RetrievalConfig;
use crate::database::Database;
use crate::database::models::Expert;
use crate::database::queries::DocumentQueries;
use crate::embeddings::EmbeddingClient;
use crate::generation::{ChatMessage, GenerationClient};
use crate::vector_store::{ScoredChunk, VectorStoreClient};
use crate::{KbError, Result};

/// Fixed answer when retrieval comes back empty. The generation
/// collaborator is not called in that case.
pub const NO_CONTEXT_ANSWER: &str =
    "Ich konnte keine relevanten Informationen in den Dokumenten finden.";

const UNKNOWN_DOCUMENT_NAME: &str = "Unbekannt";

/// Denormalized citation snapshot taken at answer time. Source documents
/// may later be edited or deleted, so this is a copy, not a live
/// reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceChunk {
    pub document_name: String,
    pub page_number: Option<u32>,
    pub content_preview: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RagAnswer {
    pub answer: String,
    pub sources: Vec<SourceChunk>,
}

pub struct RagEngine {
    database: Database,
    vector_store: Arc<VectorStoreClient>,
    embedder: EmbeddingClient,
    generator: GenerationClient,
    retrieval: RetrievalConfig,
}

impl RagEngine {
    #[inline]
    pub fn new(
        database: Database,
        vector_store: Arc<VectorStoreClient>,
        embedder: EmbeddingClient,
        generator: GenerationClient,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            database,
            vector_store,
            embedder,
            generator,
            retrieval,
        }
    }

    /// Answer a question from the expert's documents.
    ///
    /// Returns the generated answer verbatim plus citation snapshots for
    /// the retrieved chunks. Failures on this path propagate to the
    /// caller: there is no persistent retrieval record to annotate.
    #[inline]
    pub async fn answer(
        &self,
        expert: &Expert,
        question: &str,
        history: &[ChatMessage],
        model_override: Option<&str>,
    ) -> Result<RagAnswer> {
        let embedder = self.embedder.clone();
        let question_text = question.to_string();
        let query_vector = tokio::task::spawn_blocking(move || embedder.embed_one(&question_text))
            .await
            .map_err(|e| KbError::Other(anyhow!("embedding task failed: {e}")))??;

        let hits = self
            .vector_store
            .query(
                expert.id,
                &query_vector,
                self.retrieval.max_candidates,
                self.retrieval.relevance_threshold,
                self.retrieval.min_results,
            )
            .await?;

        if hits.is_empty() {
            info!("No relevant chunks for expert {}, returning sentinel", expert.id);
            return Ok(RagAnswer {
                answer: NO_CONTEXT_ANSWER.to_string(),
                sources: Vec::new(),
            });
        }

        debug!("Retrieved {} chunks for expert {}", hits.len(), expert.id);

        let document_names = self.resolve_document_names(&hits).await?;

        let sources = hits
            .iter()
            .map(|hit| SourceChunk {
                document_name: document_name(&document_names, hit),
                page_number: hit.metadata.page_number,
                content_preview: preview(&hit.content, self.retrieval.preview_chars),
                similarity: hit.similarity,
            })
            .collect();

        let context = build_context(&hits, &document_names);
        let messages = self.build_messages(expert, question, history, &context);

        let generator = self.generator.clone();
        let model = model_override.map(str::to_string);
        let answer =
            tokio::task::spawn_blocking(move || generator.complete(&messages, model.as_deref()))
                .await
                .map_err(|e| KbError::Other(anyhow!("generation task failed: {e}")))??;

        Ok(RagAnswer { answer, sources })
    }

    async fn resolve_document_names(&self, hits: &[ScoredChunk]) -> Result<HashMap<i64, String>> {
        let mut names = HashMap::new();

        for document_id in hits.iter().map(|h| h.metadata.document_id).unique() {
            if let Some(document) =
                DocumentQueries::get_by_id(self.database.pool(), document_id).await?
            {
                names.insert(document_id, document.name);
            }
        }

        Ok(names)
    }

    fn build_messages(
        &self,
        expert: &Expert,
        question: &str,
        history: &[ChatMessage],
        context: &str,
    ) -> Vec<ChatMessage> {
        let system_prompt = format!(
            "{}\n\nWICHTIG: Basiere deine Antworten auf den folgenden Dokumenten. Wenn du Informationen aus den Dokumenten verwendest, verweise auf die Quellen.\n\n=== DOKUMENT-KONTEXT ===\n{}\n=== ENDE KONTEXT ===\n\nBeantworte die Frage des Benutzers basierend auf den obigen Dokumenten. Wenn die Antwort nicht in den Dokumenten zu finden ist, sage das ehrlich.",
            expert.system_prompt, context
        );

        let recent_history = history
            .iter()
            .skip(history.len().saturating_sub(self.retrieval.history_limit));

        let mut messages = Vec::with_capacity(2 + self.retrieval.history_limit);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(recent_history.cloned());
        messages.push(ChatMessage::user(question));
        messages
    }
}

fn document_name(names: &HashMap<i64, String>, hit: &ScoredChunk) -> String {
    names
        .get(&hit.metadata.document_id)
        .cloned()
        .unwrap_or_else(|| UNKNOWN_DOCUMENT_NAME.to_string())
}

/// Context block fed to the generation step: one cited section per chunk,
/// in similarity order.
fn build_context(hits: &[ScoredChunk], names: &HashMap<i64, String>) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            let page_info = hit
                .metadata
                .page_number
                .map(|page| format!(" (Seite {page})"))
                .unwrap_or_default();
            format!(
                "[Quelle {}: {}{}]\n{}",
                i + 1,
                document_name(names, hit),
                page_info,
                hit.content
            )
        })
        .join("\n\n---\n\n")
}

fn preview(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let truncated: String = content.chars().take(max_chars).collect();
    format!("{truncated}...")
}
