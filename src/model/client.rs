//! Model collaborator interface and the default HTTP adapter
//!
//! The orchestrator only depends on the `ModelClient` trait; the concrete
//! adapter speaks an Ollama-compatible `/api/chat` endpoint with function
//! tools. The orchestrator applies no timeout of its own here; the model
//! collaborator's interface owns that contract.

use async_trait::async_trait;
use thiserror::Error;

use super::chat::{ChatMessage, Tool};

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("empty response from model endpoint")]
    EmptyResponse,
}

/// Response from the model collaborator.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ChatResponse {
    pub message: ChatMessage,
    #[serde(default)]
    pub done: bool,
}

/// The external language-model collaborator.
///
/// One call per conversational step: full prior history in, one assistant
/// message out, optionally carrying tool calls.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<Tool>>,
    ) -> Result<ChatResponse, ModelError>;
}

/// Client for an Ollama-compatible `/api/chat` endpoint with tool support.
#[derive(Clone)]
pub struct OllamaChatClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaChatClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ModelClient for OllamaChatClient {
    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<Tool>>,
    ) -> Result<ChatResponse, ModelError> {
        let endpoint = format!("{}/api/chat", self.base_url);

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": 0.0
            }
        });
        if let Some(t) = tools {
            body["tools"] = serde_json::to_value(t)?;
        }

        let response = self.client.post(&endpoint).json(&body).send().await?;
        let text = response.text().await?;
        if text.is_empty() {
            return Err(ModelError::EmptyResponse);
        }

        let chat_response: ChatResponse = serde_json::from_str(&text)?;
        Ok(chat_response)
    }
}
