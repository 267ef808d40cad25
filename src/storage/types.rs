use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OaichatError, Result};
use crate::providers::{Message, Role, TokenUsage};

/// A stored conversation with its full message history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// UUID v4 identifier
    pub id: String,
    /// Profile the conversation was started with
    pub profile: String,
    /// Model last used in the conversation
    pub model: String,
    /// Generated or user-supplied title
    #[serde(default)]
    pub title: Option<String>,
    /// When the conversation was created
    pub created_at: DateTime<Utc>,
    /// When the last message was appended
    pub updated_at: DateTime<Utc>,
    /// Cumulative token usage across all turns
    #[serde(default)]
    pub usage: TokenUsage,
    /// Messages ordered by `seq`
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
}

impl Conversation {
    /// First eight characters of the id, as shown in listings
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }

    /// Title, or a placeholder for untitled conversations
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("Untitled")
    }

    /// Content of the persisted system message, if any
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    /// Non-system messages in API form
    ///
    /// The system prompt is supplied by the session config at request time,
    /// so it is deliberately left out here.
    pub fn to_api_messages(&self) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(StoredMessage::to_message)
            .collect()
    }

    /// The last message when it is an unanswered user message
    pub fn dangling_user(&self) -> Option<&StoredMessage> {
        self.messages.last().filter(|m| m.role == Role::User)
    }
}

/// A message row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// 0-based position within the conversation
    pub seq: u32,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    /// Convert to the wire representation
    pub fn to_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.clone(),
        }
    }

    /// Usage recorded for this message, if the provider reported any
    pub fn usage(&self) -> Option<TokenUsage> {
        match (self.prompt_tokens, self.completion_tokens) {
            (None, None) => None,
            (p, c) => Some(TokenUsage::new(p.unwrap_or(0), c.unwrap_or(0))),
        }
    }
}

/// A message waiting to be appended
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub usage: Option<TokenUsage>,
}

impl NewMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            usage: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            usage: None,
        }
    }

    pub fn assistant(content: impl Into<String>, usage: Option<TokenUsage>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            usage,
        }
    }
}

/// Row returned by [`crate::storage::SqliteStorage::list`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub profile: String,
    pub model: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub usage: TokenUsage,
    /// Number of stored messages, system message included
    pub message_count: usize,
}

impl ConversationSummary {
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

/// Criteria for listing conversations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationFilter {
    /// Only conversations started with this profile
    pub profile: Option<String>,
    /// Case-insensitive substring of the title, or a substring of the id
    pub search: Option<String>,
    /// Maximum number of rows
    pub limit: Option<usize>,
}

pub(crate) fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Check that `next` may follow a message with role `last`
///
/// A system message is only valid as the very first message; after that
/// user and assistant alternate, starting with user.
pub fn check_sequence(last: Option<Role>, next: Role) -> Result<()> {
    let ok = matches!(
        (last, next),
        (None, Role::System)
            | (None, Role::User)
            | (Some(Role::System), Role::User)
            | (Some(Role::User), Role::Assistant)
            | (Some(Role::Assistant), Role::User)
    );
    if ok {
        return Ok(());
    }

    let reason = match (last, next) {
        (_, Role::System) => "a system message is only allowed as the first message".to_string(),
        (None, Role::Assistant) | (Some(Role::System), Role::Assistant) => {
            "an assistant message must follow a user message".to_string()
        }
        (Some(prev), next) => format!("{} message cannot follow a {} message", next, prev),
        (None, next) => format!("{} message cannot start a conversation", next),
    };
    Err(OaichatError::InvalidSequence(reason).into())
}
