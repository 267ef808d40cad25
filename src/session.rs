//! Chat session state machine
//!
//! A [`ChatSession`] owns the provider, the conversation store handle, and an
//! explicit [`SessionConfig`]. Each turn persists the user message before any
//! network I/O, streams the reply to a caller-supplied sink, and appends the
//! assistant message once the reply is complete.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::{ChatConfig, Profile};
use crate::error::{OaichatError, Result};
use crate::providers::{ChatRequest, Message, Provider, StreamChunk, TokenUsage};
use crate::storage::{NewMessage, SqliteStorage, StoredMessage};

/// Longest title kept, including the ellipsis
pub const MAX_TITLE_CHARS: usize = 60;

const TITLE_CONTEXT_MESSAGES: usize = 4;
const TITLE_MAX_TOKENS: u32 = 20;
const TITLE_TEMPERATURE: f32 = 0.7;
const TITLE_INSTRUCTION: &str = "Generate a concise 3-6 word title for this conversation. \
Respond with only the title, no quotes or extra text.";
const TITLE_QUESTION: &str = "What would be a good title for this conversation?";

/// Settings that shape every request a session makes
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Profile name recorded on new conversations
    pub profile: String,
    pub model: String,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Stream replies instead of waiting for the full completion
    pub stream: bool,
    /// Keep partial text when a turn is cancelled
    pub save_partial: bool,
}

impl SessionConfig {
    pub fn new(profile: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            model: model.into(),
            system_prompt: None,
            temperature: None,
            max_tokens: None,
            stream: true,
            save_partial: false,
        }
    }

    /// Build a config from a resolved profile and the chat defaults
    ///
    /// # Errors
    ///
    /// Returns `OaichatError::Config` if the profile has no default model
    pub fn from_profile(profile: &Profile, chat: &ChatConfig) -> Result<Self> {
        let model = profile.default_model.clone().ok_or_else(|| {
            OaichatError::Config(format!(
                "No model specified. Set a default model for profile '{}' or pass --model",
                profile.name
            ))
        })?;

        Ok(Self {
            profile: profile.name.clone(),
            model,
            system_prompt: profile.system_prompt.clone(),
            temperature: profile.temperature,
            max_tokens: profile.max_tokens,
            stream: chat.stream,
            save_partial: chat.save_partial,
        })
    }

    /// Request carrying this config's sampling settings
    pub fn request(&self, messages: Vec<Message>) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages,
            stream: self.stream,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Ready for the next turn
    Idle,
    /// A turn is in flight
    AwaitingResponse,
    /// The user left; no further turns
    Terminated,
}

/// Result of a completed or cancelled turn
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The assistant reply was received and stored
    Completed {
        content: String,
        usage: Option<TokenUsage>,
    },
    /// The turn was cancelled before the reply finished
    Cancelled {
        /// Text received before cancellation
        partial: String,
        /// Whether `partial` was stored as the assistant message
        saved: bool,
    },
}

/// Text and usage gathered from one request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectedResponse {
    pub content: String,
    pub usage: Option<TokenUsage>,
    pub cancelled: bool,
}

/// Issue a request and feed the reply to `sink` as it arrives
///
/// Streams when `request.stream` is set, otherwise waits for the full
/// completion and hands it to `sink` in one piece. Cancellation stops
/// reading and returns what arrived so far with `cancelled` set.
///
/// # Errors
///
/// Returns the provider's error for transport or HTTP failures, including
/// failures in the middle of a stream. A reply that finishes without any
/// text is an `OaichatError::Network` error.
pub async fn collect_response(
    provider: &dyn Provider,
    request: &ChatRequest,
    sink: &mut dyn FnMut(&str),
    cancel: &CancellationToken,
) -> Result<CollectedResponse> {
    let mut collected = CollectedResponse::default();

    if !request.stream {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                collected.cancelled = true;
            }

            response = provider.complete(request) => {
                let response = response?;
                sink(&response.content);
                collected.content = response.content;
                collected.usage = response.usage;
            }
        }
        return ensure_not_empty(collected);
    }

    let mut stream = tokio::select! {
        biased;

        _ = cancel.cancelled() => {
            collected.cancelled = true;
            return Ok(collected);
        }

        stream = provider.stream(request) => stream?,
    };

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::debug!("Response cancelled after {} bytes", collected.content.len());
                collected.cancelled = true;
                break;
            }

            item = stream.next() => match item {
                Some(Ok(StreamChunk::Delta(text))) => {
                    sink(&text);
                    collected.content.push_str(&text);
                }
                Some(Ok(StreamChunk::Usage(usage))) => collected.usage = Some(usage),
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }
    }

    ensure_not_empty(collected)
}

fn ensure_not_empty(collected: CollectedResponse) -> Result<CollectedResponse> {
    if !collected.cancelled && collected.content.is_empty() {
        return Err(OaichatError::Network("Provider returned an empty response".to_string()).into());
    }
    Ok(collected)
}

/// Trim, unquote and shorten a generated title
///
/// Returns `None` when nothing usable is left.
pub fn clean_title(raw: &str) -> Option<String> {
    let first_line = raw.trim().lines().next().unwrap_or("").trim();
    let unquoted = first_line
        .trim_matches(|c| matches!(c, '"' | '\'' | '`' | '*'))
        .trim()
        .trim_end_matches('.')
        .trim();

    if unquoted.is_empty() {
        return None;
    }

    if unquoted.chars().count() > MAX_TITLE_CHARS {
        let head: String = unquoted.chars().take(MAX_TITLE_CHARS - 3).collect();
        return Some(format!("{}...", head.trim_end()));
    }
    Some(unquoted.to_string())
}

/// An interactive chat session bound to one conversation at a time
pub struct ChatSession {
    provider: Box<dyn Provider>,
    storage: SqliteStorage,
    config: SessionConfig,
    conversation_id: Option<String>,
    state: SessionState,
    usage: TokenUsage,
}

impl ChatSession {
    /// Start a session; the conversation is created on the first turn
    pub fn new(provider: Box<dyn Provider>, storage: SqliteStorage, config: SessionConfig) -> Self {
        Self {
            provider,
            storage,
            config,
            conversation_id: None,
            state: SessionState::Idle,
            usage: TokenUsage::default(),
        }
    }

    /// Continue a stored conversation
    ///
    /// When `config` has no system prompt, the conversation's persisted one is
    /// adopted so follow-up requests keep the same framing.
    ///
    /// # Errors
    ///
    /// Returns `OaichatError::NotFound` / `OaichatError::AmbiguousId` if the
    /// id does not resolve
    pub fn resume(
        provider: Box<dyn Provider>,
        storage: SqliteStorage,
        mut config: SessionConfig,
        id_or_prefix: &str,
    ) -> Result<Self> {
        let conversation = storage.get(id_or_prefix)?;
        if config.system_prompt.is_none() {
            config.system_prompt = conversation.system_prompt().map(str::to_string);
        }
        tracing::info!(
            "Resuming conversation {} ({} messages)",
            conversation.id,
            conversation.messages.len()
        );

        let mut session = Self::new(provider, storage, config);
        session.conversation_id = Some(conversation.id);
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Id of the current conversation, once one has been created
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Tokens used by this session so far
    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    /// Stored messages of the current conversation
    pub fn history(&self) -> Result<Vec<StoredMessage>> {
        match &self.conversation_id {
            Some(id) => Ok(self.storage.get(id)?.messages),
            None => Ok(Vec::new()),
        }
    }

    /// Unanswered user message left by a failed or cancelled turn
    pub fn pending_user_message(&self) -> Result<Option<StoredMessage>> {
        match &self.conversation_id {
            Some(id) => Ok(self.storage.get(id)?.dangling_user().cloned()),
            None => Ok(None),
        }
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state {
            SessionState::Idle => Ok(()),
            SessionState::AwaitingResponse => Err(OaichatError::SessionState(
                "a response is already in progress".to_string(),
            )
            .into()),
            SessionState::Terminated => {
                Err(OaichatError::SessionState("session has ended".to_string()).into())
            }
        }
    }

    fn ensure_conversation(&mut self) -> Result<String> {
        if let Some(id) = &self.conversation_id {
            return Ok(id.clone());
        }

        let id = self.storage.create(&self.config.profile, &self.config.model)?;
        if let Some(prompt) = &self.config.system_prompt {
            self.storage.append(&id, NewMessage::system(prompt.clone()))?;
        }
        self.conversation_id = Some(id.clone());
        Ok(id)
    }

    /// System prompt from the session config followed by stored turns
    fn outgoing_messages(&self, id: &str) -> Result<Vec<Message>> {
        let conversation = self.storage.get(id)?;
        let mut messages = Vec::with_capacity(conversation.messages.len() + 1);
        if let Some(prompt) = &self.config.system_prompt {
            messages.push(Message::system(prompt.clone()));
        }
        messages.extend(conversation.to_api_messages());
        Ok(messages)
    }

    /// Send a user message and wait for the reply
    ///
    /// The user message is committed before the request is made. A previous
    /// unanswered user message is replaced.
    ///
    /// # Errors
    ///
    /// * `OaichatError::SessionState` when the session is not idle
    /// * provider errors, in which case the user message stays stored and
    ///   [`ChatSession::retry`] can resend it
    pub async fn send(
        &mut self,
        input: &str,
        sink: &mut dyn FnMut(&str),
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        self.ensure_active()?;
        if input.trim().is_empty() {
            return Err(OaichatError::SessionState("message is empty".to_string()).into());
        }

        let id = self.ensure_conversation()?;
        if let Some(previous) = self.storage.discard_trailing_user(&id)? {
            tracing::warn!(
                "Replacing unanswered message seq={} in {}",
                previous.seq,
                id
            );
        }
        self.storage.append(&id, NewMessage::user(input))?;

        self.run_turn(&id, sink, cancel).await
    }

    /// Resend the request for an unanswered user message
    pub async fn retry(
        &mut self,
        sink: &mut dyn FnMut(&str),
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        self.ensure_active()?;
        let id = match (&self.conversation_id, self.pending_user_message()?) {
            (Some(id), Some(_)) => id.clone(),
            _ => {
                return Err(OaichatError::SessionState(
                    "nothing to retry: the last message already has a reply".to_string(),
                )
                .into())
            }
        };

        tracing::info!("Retrying last message in {}", id);
        self.run_turn(&id, sink, cancel).await
    }

    async fn run_turn(
        &mut self,
        id: &str,
        sink: &mut dyn FnMut(&str),
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        let request = self.config.request(self.outgoing_messages(id)?);

        self.state = SessionState::AwaitingResponse;
        let result = collect_response(self.provider.as_ref(), &request, sink, cancel).await;
        self.state = SessionState::Idle;

        let collected = match result {
            Ok(collected) => collected,
            Err(e) => {
                tracing::warn!("Turn failed, user message kept for retry: {:#}", e);
                return Err(e);
            }
        };

        if collected.cancelled {
            let saved = self.config.save_partial && !collected.content.is_empty();
            if saved {
                self.storage
                    .append(id, NewMessage::assistant(collected.content.clone(), None))?;
            }
            tracing::info!("Turn cancelled (partial saved: {})", saved);
            return Ok(TurnOutcome::Cancelled {
                partial: collected.content,
                saved,
            });
        }

        self.storage.append(
            id,
            NewMessage::assistant(collected.content.clone(), collected.usage),
        )?;
        if let Some(usage) = collected.usage {
            self.usage.add(usage);
        }

        Ok(TurnOutcome::Completed {
            content: collected.content,
            usage: collected.usage,
        })
    }

    /// Start a new conversation on the next turn; the stored one is kept
    pub fn clear(&mut self) -> Result<()> {
        self.ensure_active()?;
        if let Some(id) = self.conversation_id.take() {
            tracing::info!("Cleared session; conversation {} left in history", id);
        }
        Ok(())
    }

    /// Change the system prompt used for later requests
    ///
    /// Stored messages are not rewritten; an empty prompt removes it.
    pub fn set_system_prompt(&mut self, prompt: &str) -> Result<()> {
        self.ensure_active()?;
        let prompt = prompt.trim();
        self.config.system_prompt = if prompt.is_empty() {
            None
        } else {
            Some(prompt.to_string())
        };
        Ok(())
    }

    /// Change the model used for later requests
    pub fn switch_model(&mut self, model: &str) -> Result<()> {
        self.ensure_active()?;
        let model = model.trim();
        if model.is_empty() {
            return Err(OaichatError::SessionState("model name is empty".to_string()).into());
        }
        self.config.model = model.to_string();
        if let Some(id) = &self.conversation_id {
            self.storage.set_model(id, model)?;
        }
        tracing::info!("Switched model to {}", model);
        Ok(())
    }

    /// Whether the current conversation exists and has no title yet
    pub fn needs_title(&self) -> Result<bool> {
        match &self.conversation_id {
            Some(id) => {
                let conversation = self.storage.get(id)?;
                Ok(conversation.title.is_none() && !conversation.to_api_messages().is_empty())
            }
            None => Ok(false),
        }
    }

    /// Ask the model for a short title and store it
    ///
    /// Best effort: any failure is logged and leaves the conversation
    /// untitled, and so does cancelling `cancel` while the request is in
    /// flight. Returns the stored title on success.
    pub async fn generate_title(&mut self, cancel: &CancellationToken) -> Option<String> {
        let id = self.conversation_id.clone()?;
        match self.try_generate_title(&id, cancel).await {
            Ok(title) => title,
            Err(e) => {
                tracing::warn!("Title generation failed for {}: {:#}", id, e);
                None
            }
        }
    }

    async fn try_generate_title(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let conversation = self.storage.get(id)?;
        let context: Vec<Message> = conversation
            .to_api_messages()
            .into_iter()
            .take(TITLE_CONTEXT_MESSAGES)
            .collect();
        if context.is_empty() {
            return Ok(None);
        }

        let mut messages = Vec::with_capacity(context.len() + 2);
        messages.push(Message::system(TITLE_INSTRUCTION));
        messages.extend(context);
        messages.push(Message::user(TITLE_QUESTION));

        let mut request = ChatRequest::new(self.config.model.clone(), messages);
        request.temperature = Some(TITLE_TEMPERATURE);
        request.max_tokens = Some(TITLE_MAX_TOKENS);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Title generation cancelled for {}", id);
                return Ok(None);
            }
            response = self.provider.complete(&request) => response?,
        };
        let title = match clean_title(&response.content) {
            Some(title) => title,
            None => {
                tracing::warn!("Model returned an empty title for {}", id);
                return Ok(None);
            }
        };

        self.storage.set_title(id, &title)?;
        tracing::debug!("Titled conversation {}: {}", id, title);
        Ok(Some(title))
    }

    /// Leave the session; later turns are rejected
    pub fn terminate(&mut self) {
        self.state = SessionState::Terminated;
    }
}
