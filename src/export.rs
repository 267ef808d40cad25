//! Conversation export
//!
//! Pure transforms from a stored [`Conversation`] to Markdown or JSON text.
//! Writing the result to disk is left to the caller.

use std::fmt;
use std::str::FromStr;

use crate::error::{OaichatError, Result};
use crate::providers::Role;
use crate::storage::{check_sequence, Conversation};

const MAX_FILENAME_TITLE: usize = 50;

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Markdown,
    Json,
}

impl ExportFormat {
    /// File extension without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = OaichatError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "md" | "markdown" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            _ => Err(OaichatError::UnsupportedFormat(format!(
                "'{}' (expected md, markdown or json)",
                s
            ))),
        }
    }
}

/// Render a conversation in the given format
pub fn export(conversation: &Conversation, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Markdown => Ok(to_markdown(conversation)),
        ExportFormat::Json => to_json(conversation),
    }
}

fn role_heading(role: Role) -> &'static str {
    match role {
        Role::System => "System",
        Role::User => "User",
        Role::Assistant => "Assistant",
    }
}

/// Render a conversation as Markdown
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use oaichat::export::to_markdown;
/// use oaichat::providers::TokenUsage;
/// use oaichat::storage::Conversation;
///
/// let convo = Conversation {
///     id: "0123456789".into(),
///     profile: "local".into(),
///     model: "llama3".into(),
///     title: Some("Greeting".into()),
///     created_at: Utc::now(),
///     updated_at: Utc::now(),
///     usage: TokenUsage::default(),
///     messages: vec![],
/// };
/// assert!(to_markdown(&convo).starts_with("# Greeting"));
/// ```
pub fn to_markdown(conversation: &Conversation) -> String {
    let fmt_ts = "%Y-%m-%d %H:%M:%S UTC";
    let mut out = String::new();

    out.push_str(&format!(
        "# {}\n\n",
        conversation.title.as_deref().unwrap_or("Conversation")
    ));
    out.push_str(&format!("**Model:** {}  \n", conversation.model));
    out.push_str(&format!("**Profile:** {}  \n", conversation.profile));
    out.push_str(&format!(
        "**Created:** {}  \n",
        conversation.created_at.format(fmt_ts)
    ));
    out.push_str(&format!(
        "**Updated:** {}  \n\n",
        conversation.updated_at.format(fmt_ts)
    ));

    if let Some(prompt) = conversation.system_prompt() {
        out.push_str("## System Prompt\n\n");
        for line in prompt.lines() {
            out.push_str(&format!("> {}\n", line));
        }
        out.push('\n');
    }

    out.push_str("## Conversation\n\n");
    for message in conversation
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
    {
        out.push_str(&format!("### {}\n\n", role_heading(message.role)));
        out.push_str(message.content.trim_end());
        out.push_str("\n\n");

        if let Some(usage) = message.usage() {
            out.push_str(&format!(
                "*Tokens: {} prompt + {} completion*\n\n",
                usage.prompt_tokens, usage.completion_tokens
            ));
        }
        out.push_str("---\n\n");
    }

    let usage = conversation.usage;
    if usage.total() > 0 {
        out.push_str(&format!(
            "**Total Tokens:** {} ({} prompt + {} completion)\n",
            usage.total(),
            usage.prompt_tokens,
            usage.completion_tokens
        ));
    }

    out
}

/// Render a conversation as pretty-printed JSON
pub fn to_json(conversation: &Conversation) -> Result<String> {
    Ok(serde_json::to_string_pretty(conversation)?)
}

/// Parse a JSON export back into a conversation
///
/// # Errors
///
/// Returns `OaichatError::Serialization` for malformed JSON and
/// `OaichatError::InvalidSequence` if the messages break role order
pub fn from_json(json: &str) -> Result<Conversation> {
    let conversation: Conversation =
        serde_json::from_str(json).map_err(OaichatError::Serialization)?;

    let mut last = None;
    for (expected_seq, message) in conversation.messages.iter().enumerate() {
        if message.seq as usize != expected_seq {
            return Err(OaichatError::InvalidSequence(format!(
                "message seq {} found at position {}",
                message.seq, expected_seq
            ))
            .into());
        }
        check_sequence(last, message.role)?;
        last = Some(message.role);
    }

    Ok(conversation)
}

/// Filesystem-safe file name: sanitized title, short id, extension
///
/// ```
/// # use chrono::Utc;
/// # use oaichat::export::{export_filename, ExportFormat};
/// # use oaichat::providers::TokenUsage;
/// # use oaichat::storage::Conversation;
/// let convo = Conversation {
///     id: "deadbeef-0000".into(),
///     profile: "p".into(),
///     model: "m".into(),
///     title: Some("What is Rust?".into()),
///     created_at: Utc::now(),
///     updated_at: Utc::now(),
///     usage: TokenUsage::default(),
///     messages: vec![],
/// };
/// assert_eq!(export_filename(&convo, ExportFormat::Markdown), "What_is_Rust__deadbeef.md");
/// ```
pub fn export_filename(conversation: &Conversation, format: ExportFormat) -> String {
    let title = conversation.title.as_deref().unwrap_or("conversation");

    let sanitized: String = title
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == ' ' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut safe: String = sanitized
        .trim()
        .replace(' ', "_")
        .chars()
        .take(MAX_FILENAME_TITLE)
        .collect();
    if safe.is_empty() {
        safe = "conversation".to_string();
    }

    format!(
        "{}_{}.{}",
        safe,
        conversation.short_id(),
        format.extension()
    )
}
