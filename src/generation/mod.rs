// Chat-completion client for the answer-synthesis collaborator.


use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GenerationConfig;
use crate::embeddings::upstream_error;
use crate::{KbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single role-tagged conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    #[inline]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    #[inline]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Client for the text-generation collaborator, treated as a black-box
/// completion service consuming a message sequence and returning a string.
#[derive(Debug, Clone)]
pub struct GenerationClient {
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

impl GenerationClient {
    #[inline]
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_seconds)))
            .build()
            .into();

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.resolved_api_key()?,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            agent,
        })
    }

    /// Send a message sequence to the generation service and return the
    /// first choice's content verbatim.
    #[inline]
    pub fn complete(&self, messages: &[ChatMessage], model_override: Option<&str>) -> Result<String> {
        let model = model_override.unwrap_or(&self.model);
        debug!("Requesting completion from model {model}");

        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let request_json = serde_json::to_string(&request).map_err(|e| {
            KbError::GenerationService {
                status: None,
                detail: format!("failed to serialize request: {e}"),
            }
        })?;

        let response_text = self
            .agent
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", &format!("Bearer {}", self.api_key))
            .send(&request_json)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|e| {
                let (status, detail) = upstream_error(e);
                KbError::GenerationService { status, detail }
            })?;

        let response: ChatResponse =
            serde_json::from_str(&response_text).map_err(|e| KbError::GenerationService {
                status: None,
                detail: format!("failed to parse response: {e}"),
            })?;

        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| KbError::GenerationService {
                status: None,
                detail: "response contained no choices".to_string(),
            })
    }
}
