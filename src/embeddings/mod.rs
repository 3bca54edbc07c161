// Batched text embedding over an OpenAI-compatible HTTP endpoint.


use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::{KbError, Result};

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 1536;

/// Client for the embedding collaborator. Batches inputs to respect
/// upstream request-size limits and restores response ordering; embedding
/// is all-or-nothing per call, and retry policy belongs to the caller.
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    base_url: String,
    api_key: String,
    model: String,
    batch_size: usize,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedItem>,
}

#[derive(Debug, Deserialize)]
struct EmbedItem {
    embedding: Vec<f32>,
    index: usize,
}

impl EmbeddingClient {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_seconds)))
            .build()
            .into();

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.resolved_api_key()?,
            model: config.model.clone(),
            batch_size: config.batch_size as usize,
            agent,
        })
    }

    /// Embed a list of texts, one vector per input, in input order.
    ///
    /// Inputs are processed in batches; a failure in any batch fails the
    /// whole call and no partial result is returned.
    #[inline]
    pub fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Embedding {} texts in batches of {}",
            texts.len(),
            self.batch_size
        );

        let mut embeddings = Vec::with_capacity(texts.len());
        for (batch_number, batch) in texts.chunks(self.batch_size).enumerate() {
            embeddings.extend(self.embed_batch(batch)?);
            debug!("Embedded batch {} ({} texts)", batch_number + 1, batch.len());
        }

        Ok(embeddings)
    }

    /// Embed a single query string.
    #[inline]
    pub fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed(std::slice::from_ref(&text.to_string()))?;
        embeddings.pop().ok_or_else(|| KbError::EmbeddingService {
            status: None,
            detail: "embedding response was empty".to_string(),
        })
    }

    fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let request = EmbedRequest {
            model: &self.model,
            input: batch,
        };
        let request_json = serde_json::to_string(&request).map_err(|e| {
            KbError::EmbeddingService {
                status: None,
                detail: format!("failed to serialize request: {e}"),
            }
        })?;

        let response_text = self
            .send(&url, &request_json)
            .map_err(|(status, detail)| KbError::EmbeddingService { status, detail })?;

        let response: EmbedResponse =
            serde_json::from_str(&response_text).map_err(|e| KbError::EmbeddingService {
                status: None,
                detail: format!("failed to parse response: {e}"),
            })?;

        if response.data.len() != batch.len() {
            return Err(KbError::EmbeddingService {
                status: None,
                detail: format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    response.data.len()
                ),
            });
        }

        // The upstream service does not guarantee response ordering
        let mut data = response.data;
        data.sort_by_key(|item| item.index);

        Ok(data.into_iter().map(|item| item.embedding).collect())
    }

    fn send(&self, url: &str, body: &str) -> std::result::Result<String, (Option<u16>, String)> {
        self.agent
            .post(url)
            .header("Content-Type", "application/json")
            .header("Authorization", &format!("Bearer {}", self.api_key))
            .send(body)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(upstream_error)
    }
}

/// Map a transport-level error to an upstream HTTP status plus detail.
pub(crate) fn upstream_error(error: ureq::Error) -> (Option<u16>, String) {
    match error {
        ureq::Error::StatusCode(status) => (Some(status), format!("HTTP {status}")),
        ureq::Error::Timeout(_) => (None, "request timed out".to_string()),
        other => (None, other.to_string()),
    }
}
