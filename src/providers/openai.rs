//! OpenAI-compatible provider implementation
//!
//! Talks to any server exposing `POST {base_url}/chat/completions` and
//! `GET {base_url}/models` with Bearer authentication: OpenAI itself, Ollama's
//! `/v1` shim, LM Studio, Groq, Together, and similar.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::Profile;
use crate::error::{OaichatError, Result};
use crate::providers::base::{
    ChatRequest, ChatStream, CompletionResponse, ModelInfo, Provider,
};
use crate::providers::sse::{chat_stream_from_bytes, ErrorPayload, UsagePayload};

/// Default request timeout; long generations on local models can be slow.
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Deserialize)]
struct CompletionPayload {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<UsagePayload>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorPayload,
}

/// `/models` answers with `{"data": [...]}`; a few servers return a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ModelsPayload {
    Wrapped { data: Vec<ModelInfo> },
    Bare(Vec<ModelInfo>),
}

/// Provider for OpenAI-compatible chat-completion endpoints
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiProvider {
    /// Create a provider for a resolved profile
    ///
    /// # Errors
    ///
    /// Returns `OaichatError::Config` if the HTTP client cannot be built
    ///
    /// # Examples
    ///
    /// ```
    /// use oaichat::config::Profile;
    /// use oaichat::providers::OpenAiProvider;
    ///
    /// let profile = Profile::new("local", "http://localhost:11434/v1/", "not-needed");
    /// let provider = OpenAiProvider::new(&profile, 30).unwrap();
    /// assert_eq!(provider.base_url(), "http://localhost:11434/v1");
    /// ```
    pub fn new(profile: &Profile, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("oaichat/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OaichatError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = profile.base_url.trim_end_matches('/').to_string();
        tracing::debug!(
            "Initialized OpenAI-compatible provider: profile={}, base_url={}",
            profile.name,
            base_url
        );

        Ok(Self {
            client,
            base_url,
            api_key: profile.api_key.clone(),
        })
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post_chat(&self, request: &ChatRequest) -> Result<reqwest::Response> {
        let url = self.endpoint("chat/completions");
        tracing::debug!(
            "POST {} model={} messages={} stream={}",
            url,
            request.model,
            request.messages.len(),
            request.stream
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Chat request failed: {}", e);
                OaichatError::Network(format!("Failed to reach {}: {}", self.base_url, e))
            })?;

        check_status(response).await
    }
}

/// Map a non-success response to `OaichatError::Http`
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            if body.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                body
            }
        });

    tracing::error!("Provider returned error {}: {}", status, message);
    Err(OaichatError::Http {
        status: status.as_u16(),
        message,
    }
    .into())
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn complete(&self, request: &ChatRequest) -> Result<CompletionResponse> {
        let mut request = request.clone();
        request.stream = false;

        let response = self.post_chat(&request).await?;
        let payload: CompletionPayload = response.json().await.map_err(|e| {
            OaichatError::Network(format!("Failed to parse completion response: {}", e))
        })?;

        let content = payload
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| {
                OaichatError::Network("Provider returned an empty response".to_string())
            })?;

        Ok(CompletionResponse {
            content,
            usage: payload.usage.map(Into::into),
        })
    }

    async fn stream(&self, request: &ChatRequest) -> Result<ChatStream> {
        let mut request = request.clone();
        request.stream = true;

        let response = self.post_chat(&request).await?;
        Ok(chat_stream_from_bytes(response.bytes_stream()))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self.endpoint("models");
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| {
                OaichatError::Network(format!("Failed to reach {}: {}", self.base_url, e))
            })?;
        let response = check_status(response).await?;

        let payload: ModelsPayload = response
            .json()
            .await
            .map_err(|e| OaichatError::Network(format!("Failed to parse models response: {}", e)))?;

        let mut models = match payload {
            ModelsPayload::Wrapped { data } => data,
            ModelsPayload::Bare(models) => models,
        };
        models.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(models)
    }
}
