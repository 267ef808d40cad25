//! Base provider trait and common types for oaichat
//!
//! This module defines the [`Provider`] trait implemented by chat backends,
//! along with the message, request, usage, and streaming types shared by the
//! session loop and the storage layer.

use crate::error::Result;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions that frame the conversation
    System,
    /// Human input
    User,
    /// Model output
    Assistant,
}

impl Role {
    /// Wire / database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!("Unknown message role: {}", other)),
        }
    }
}

/// Message structure sent to the chat-completions endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: Role,
    /// Content of the message
    pub content: String,
}

impl Message {
    /// Creates a new user message
    ///
    /// # Examples
    ///
    /// ```
    /// use oaichat::providers::{Message, Role};
    ///
    /// let msg = Message::user("Hello, assistant!");
    /// assert_eq!(msg.role, Role::User);
    /// ```
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Creates a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Creates a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Token usage information from a completion
///
/// Tracks the number of tokens used in prompts and completions,
/// as reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the prompt
    pub prompt_tokens: u32,
    /// Number of tokens in the completion
    pub completion_tokens: u32,
}

impl TokenUsage {
    /// Create a new TokenUsage instance
    ///
    /// # Examples
    ///
    /// ```
    /// use oaichat::providers::TokenUsage;
    ///
    /// let usage = TokenUsage::new(100, 50);
    /// assert_eq!(usage.total(), 150);
    /// ```
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    /// Prompt plus completion tokens
    pub fn total(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }

    /// Accumulate another usage report into this one
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self
            .completion_tokens
            .saturating_add(other.completion_tokens);
    }
}

/// Request body for `POST /chat/completions`
///
/// Optional sampling fields are omitted from the JSON when unset so that
/// servers fall back to their own defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    /// Model identifier
    pub model: String,
    /// Conversation so far, oldest first
    pub messages: Vec<Message>,
    /// Whether the server should reply with an SSE stream
    pub stream: bool,
    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Upper bound on completion tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    /// Build a request with no sampling overrides
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: false,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// Completion response with message text and optional token usage
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    /// Assistant text
    pub content: String,
    /// Token usage, when the provider reports it
    pub usage: Option<TokenUsage>,
}

/// One item of a streamed completion
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Incremental assistant text
    Delta(String),
    /// Usage report, usually on the last event
    Usage(TokenUsage),
}

/// Lazy sequence of streamed fragments; the stream ending means completion
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Model listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier (e.g., "gpt-4o-mini")
    pub id: String,
    /// Object type reported by the API, usually "model"
    #[serde(default = "default_object")]
    pub object: String,
    /// Owner reported by the API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owned_by: Option<String>,
}

fn default_object() -> String {
    "model".to_string()
}

/// Provider trait for chat backends
///
/// # Examples
///
/// ```no_run
/// use oaichat::providers::{ChatRequest, ChatStream, CompletionResponse, ModelInfo, Provider};
/// use oaichat::error::Result;
/// use async_trait::async_trait;
///
/// struct Echo;
///
/// #[async_trait]
/// impl Provider for Echo {
///     async fn complete(&self, request: &ChatRequest) -> Result<CompletionResponse> {
///         let last = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
///         Ok(CompletionResponse { content: last, usage: None })
///     }
///
///     async fn stream(&self, _request: &ChatRequest) -> Result<ChatStream> {
///         Ok(Box::pin(futures::stream::empty()))
///     }
///
///     async fn list_models(&self) -> Result<Vec<ModelInfo>> {
///         Ok(Vec::new())
///     }
/// }
/// ```
#[async_trait]
pub trait Provider: Send + Sync {
    /// Request a complete (non-streamed) response
    ///
    /// # Errors
    ///
    /// Returns `OaichatError::Network` / `OaichatError::Http` if the call fails
    async fn complete(&self, request: &ChatRequest) -> Result<CompletionResponse>;

    /// Request a streamed response
    ///
    /// The returned stream yields fragments until the server signals
    /// completion; a transport failure mid-stream surfaces as an `Err` item.
    async fn stream(&self, request: &ChatRequest) -> Result<ChatStream>;

    /// List models exposed by the endpoint
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_roundtrip_through_str() {
        for role in [Role::System, Role::User, Role::Assistant] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("tool".parse::<Role>().is_err());
    }

    #[test]
    fn test_message_serializes_lowercase_role() {
        let json = serde_json::to_string(&Message::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[test]
    fn test_chat_request_omits_unset_sampling_fields() {
        let request = ChatRequest::new("gpt-4o-mini", vec![Message::user("Hello")]);
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["model"], "gpt-4o-mini");
        assert_eq!(value["stream"], false);
        assert!(value.get("temperature").is_none());
        assert!(value.get("max_tokens").is_none());
    }

    #[test]
    fn test_chat_request_includes_sampling_fields() {
        let mut request = ChatRequest::new("m", vec![Message::user("x")]);
        request.stream = true;
        request.temperature = Some(0.5);
        request.max_tokens = Some(64);
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["stream"], true);
        assert_eq!(value["temperature"], 0.5);
        assert_eq!(value["max_tokens"], 64);
    }

    #[test]
    fn test_token_usage_add_accumulates() {
        let mut usage = TokenUsage::new(10, 5);
        usage.add(TokenUsage::new(3, 2));
        assert_eq!(usage, TokenUsage::new(13, 7));
        assert_eq!(usage.total(), 20);
    }

    #[test]
    fn test_model_info_defaults_object() {
        let model: ModelInfo = serde_json::from_str(r#"{"id":"llama3"}"#).unwrap();
        assert_eq!(model.object, "model");
        assert!(model.owned_by.is_none());
    }
}
