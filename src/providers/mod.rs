//! Provider module for oaichat
//!
//! This module contains the chat backend abstraction and the
//! OpenAI-compatible implementation used for every profile.

pub mod base;
pub mod openai;
pub mod sse;

pub use base::{
    ChatRequest, ChatStream, CompletionResponse, Message, ModelInfo, Provider, Role, StreamChunk,
    TokenUsage,
};
pub use openai::OpenAiProvider;

use crate::config::Profile;
use crate::error::Result;

/// Create a provider instance for a resolved profile
///
/// # Arguments
///
/// * `profile` - Profile with environment overrides already applied
/// * `timeout_secs` - Per-request timeout
///
/// # Errors
///
/// Returns error if the HTTP client cannot be initialized
pub fn create_provider(profile: &Profile, timeout_secs: u64) -> Result<Box<dyn Provider>> {
    Ok(Box::new(OpenAiProvider::new(profile, timeout_secs)?))
}
