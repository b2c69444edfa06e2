//! Embedding and completion providers.
//!
//! The pipeline only sees the two traits; `OpenAiClient` is the HTTP
//! implementation used by the binary.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use crate::config::CompletionParams;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider is not configured: {0}")]
    NotConfigured(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited")]
    RateLimited,

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Transport failures, throttling and server-side errors are worth a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http(_) | ProviderError::RateLimited => true,
            ProviderError::Status { status, .. } => *status >= 500,
            ProviderError::NotConfigured(_) | ProviderError::InvalidResponse(_) => false,
        }
    }
}

pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

pub trait CompletionProvider: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String, ProviderError>;
}

pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    embedding_model: String,
    completion_model: String,
    params: CompletionParams,
    client: reqwest::blocking::Client,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(
        api_key: &str,
        base_url: &str,
        embedding_model: &str,
        completion_model: &str,
        params: CompletionParams,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured("missing api key".to_string()));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(OpenAiClient {
            api_key: api_key.to_string(),
            base_url: base_url.strip_suffix('/').unwrap_or(base_url).to_string(),
            embedding_model: embedding_model.to_string(),
            completion_model: completion_model.to_string(),
            params,
            client,
        })
    }

    fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::blocking::Response, ProviderError> {
        let url = format!("{}{path}", self.base_url);
        log::debug!("POST {url}");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(resp)
    }
}

impl EmbeddingProvider for OpenAiClient {
    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let resp = self.post(
            "/embeddings",
            json!({
                "input": text,
                "model": self.embedding_model,
            }),
        )?;

        let parsed: EmbeddingResponse = resp
            .json()
            .map_err(|err| ProviderError::InvalidResponse(err.to_string()))?;

        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::InvalidResponse("no embedding returned".to_string()))?;

        if embedding.is_empty() {
            return Err(ProviderError::InvalidResponse("empty embedding".to_string()));
        }

        Ok(embedding)
    }
}

impl CompletionProvider for OpenAiClient {
    fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let resp = self.post(
            "/chat/completions",
            json!({
                "model": self.completion_model,
                "messages": [{ "role": "user", "content": prompt }],
                "temperature": self.params.temperature,
                "max_tokens": self.params.max_tokens,
                "top_p": self.params.top_p,
                "frequency_penalty": self.params.frequency_penalty,
                "presence_penalty": self.params.presence_penalty,
            }),
        )?;

        let parsed: ChatResponse = resp
            .json()
            .map_err(|err| ProviderError::InvalidResponse(err.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|content| content.trim_start().to_string())
            .ok_or_else(|| ProviderError::InvalidResponse("no completion returned".to_string()))
    }
}
