/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint:

- `chat`     - Interactive chat session
- `send`     - One-shot request
- `convo`    - Stored conversation management
- `profile`  - Provider profile management
- `models`   - Model listing and selection

The handlers are thin: they resolve configuration and storage, then call
into the session, storage, export and provider layers.
*/

use crate::cli::{ChatArgs, Cli};
use crate::config::{ChatConfig, Config, Profile};
use crate::error::{kind_of, OaichatError, Result};
use crate::providers::TokenUsage;
use crate::session::SessionConfig;
use crate::storage::SqliteStorage;
use colored::Colorize;
use std::io::Write;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

// Special commands parser for the interactive loop
pub mod special_commands;

// Stored conversation commands
pub mod convo;

// Profile management commands
pub mod profile;

// Model management commands
pub mod models;

/// Resolved configuration and storage locations for one CLI invocation
#[derive(Debug, Clone)]
pub struct AppContext {
    /// Where the config file is read from and written to
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: Config,
    /// Explicit database path, if one was given
    pub db_path: Option<PathBuf>,
}

impl AppContext {
    /// Load configuration for the given command line
    pub fn load(cli: &Cli) -> Result<Self> {
        let config_path = match &cli.config {
            Some(path) => path.clone(),
            None => Config::default_path()?,
        };
        let config = Config::load(&config_path)?;

        Ok(Self {
            config_path,
            config,
            db_path: cli.db_path.clone(),
        })
    }

    /// Open the conversation store
    pub fn storage(&self) -> Result<SqliteStorage> {
        match &self.db_path {
            Some(path) => SqliteStorage::new_with_path(path.clone()),
            None => SqliteStorage::new(),
        }
    }

    /// Persist the configuration
    pub fn save_config(&self) -> Result<()> {
        self.config.save(&self.config_path)
    }
}

/// Merge profile defaults, chat defaults and command-line flags
///
/// `fallback_model` (the stored model of a resumed conversation) is used
/// when `--model` is absent, ahead of the profile default.
pub fn build_session_config(
    profile: &Profile,
    chat: &ChatConfig,
    args: &ChatArgs,
    fallback_model: Option<&str>,
) -> Result<SessionConfig> {
    let mut profile = profile.clone();
    if let Some(model) = args.model.as_deref().or(fallback_model) {
        profile.default_model = Some(model.to_string());
    }

    let mut config = SessionConfig::from_profile(&profile, chat)?;
    if let Some(system) = &args.system {
        config.system_prompt = Some(system.clone());
    }
    if args.temperature.is_some() {
        config.temperature = args.temperature;
    }
    if args.max_tokens.is_some() {
        config.max_tokens = args.max_tokens;
    }
    if args.no_stream {
        config.stream = false;
    }
    Ok(config)
}

/// Cancel `token` when Ctrl-C is pressed; abort the handle once the request ends
pub fn spawn_interrupt_watcher(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("Ctrl-C received, cancelling request");
            token.cancel();
        }
    })
}

/// Print a streamed fragment immediately
pub fn print_fragment(text: &str) {
    print!("{}", text);
    let _ = std::io::stdout().flush();
}

/// One-line token usage summary
pub fn format_usage(usage: &TokenUsage) -> String {
    format!(
        "{} prompt + {} completion = {} tokens",
        usage.prompt_tokens,
        usage.completion_tokens,
        usage.total()
    )
}

/// Print an error and its causes in red
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", "Error:".red().bold(), err);
    if let Some(OaichatError::AmbiguousId { .. }) = kind_of(err) {
        eprintln!("{}", "Use a longer id prefix.".dimmed());
    }
}

/// Ask a yes/no question on stdin; anything but y/yes is no
pub fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    std::io::stdout().flush().map_err(OaichatError::from)?;
    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .map_err(OaichatError::from)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Shorten text for single-line display
pub fn truncate(text: &str, max_chars: usize) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= max_chars {
        return single_line;
    }
    let head: String = single_line
        .chars()
        .take(max_chars.saturating_sub(3))
        .collect();
    format!("{}...", head)
}

// Chat command handler
pub mod chat {
    //! Interactive chat handler.
    //!
    //! Builds a [`ChatSession`] from the resolved profile and runs a
    //! readline loop. Ctrl-C during a reply cancels that turn only.

    use super::special_commands::{parse_special_command, print_help, SpecialCommand};
    use super::*;
    use crate::providers::create_provider;
    use crate::session::{ChatSession, TurnOutcome};
    use rustyline::error::ReadlineError;
    use rustyline::DefaultEditor;

    /// Start an interactive chat session
    ///
    /// # Arguments
    ///
    /// * `ctx` - Loaded configuration and storage location
    /// * `args` - Request flags from the command line
    /// * `resume` - Conversation id or prefix to continue
    /// * `save_partial` - Keep partial replies on Ctrl-C
    pub async fn run_chat(
        ctx: &AppContext,
        args: ChatArgs,
        resume: Option<String>,
        save_partial: bool,
    ) -> Result<()> {
        tracing::info!("Starting interactive chat");
        let storage = ctx.storage()?;

        let resumed = match &resume {
            Some(id) => Some(storage.get(id)?),
            None => None,
        };
        let profile_name = args
            .profile
            .as_deref()
            .or(resumed.as_ref().map(|c| c.profile.as_str()));
        let profile = ctx.config.resolve_profile(profile_name)?;

        let mut session_config = build_session_config(
            &profile,
            &ctx.config.chat,
            &args,
            resumed.as_ref().map(|c| c.model.as_str()),
        )?;
        session_config.save_partial |= save_partial;

        let provider = create_provider(&profile, ctx.config.chat.request_timeout_seconds)?;
        let mut session = match &resumed {
            Some(conversation) => {
                if args.system.is_none() {
                    // Resumed conversations keep their stored framing.
                    session_config.system_prompt = None;
                }
                ChatSession::resume(provider, storage.clone(), session_config, &conversation.id)?
            }
            None => ChatSession::new(provider, storage.clone(), session_config),
        };

        let mut rl = DefaultEditor::new()?;
        print_welcome_banner(&session);
        if let Some(conversation) = &resumed {
            println!(
                "Resuming {} ({} messages)\n",
                conversation.display_title().cyan(),
                conversation.messages.len()
            );
        }

        loop {
            let prompt = format!("{} ", "You>".green().bold());
            let line = match rl.readline(&prompt) {
                Ok(line) => line,
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(err) => {
                    tracing::error!("Readline error: {:?}", err);
                    break;
                }
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let _ = rl.add_history_entry(trimmed);

            let command = match parse_special_command(trimmed) {
                Ok(command) => command,
                Err(e) => {
                    println!("{}", e.to_string().yellow());
                    continue;
                }
            };

            let result = match command {
                SpecialCommand::Exit => break,
                SpecialCommand::Help => {
                    print_help();
                    Ok(())
                }
                SpecialCommand::Clear => session.clear().map(|_| {
                    println!("{}", "Started a new conversation.".green());
                }),
                SpecialCommand::SetSystem(prompt) => {
                    session.set_system_prompt(&prompt).map(|_| {
                        println!("{}", "System prompt updated.".green());
                    })
                }
                SpecialCommand::SwitchModel(model) => session.switch_model(&model).map(|_| {
                    println!("{}", format!("Switched to model: {}", model).green());
                }),
                SpecialCommand::Save => {
                    save_conversation(&mut session).await;
                    Ok(())
                }
                SpecialCommand::Usage => print_usage(&session, &storage),
                SpecialCommand::Status => print_status_display(&session, &storage),
                SpecialCommand::Retry => run_turn(&mut session, None).await,
                SpecialCommand::None => run_turn(&mut session, Some(trimmed)).await,
            };

            if let Err(e) = result {
                let (fatal, network) = match kind_of(&e) {
                    Some(OaichatError::Storage(_)) => (true, false),
                    Some(kind) => (false, kind.is_network()),
                    None => (false, false),
                };
                if fatal {
                    return Err(e);
                }
                print_error(&e);
                if network {
                    eprintln!(
                        "{}",
                        "Your message was kept. Type /retry to resend it.".dimmed()
                    );
                }
            }
        }

        if session.needs_title().unwrap_or(false) {
            save_conversation(&mut session).await;
        }
        session.terminate();
        println!("\n{}", "Goodbye!".dimmed());
        Ok(())
    }

    async fn run_turn(session: &mut ChatSession, input: Option<&str>) -> Result<()> {
        let cancel = CancellationToken::new();
        let watcher = spawn_interrupt_watcher(cancel.clone());
        let mut sink = |text: &str| print_fragment(text);

        println!("\n{}", "Assistant".blue().bold());
        let result = match input {
            Some(text) => session.send(text, &mut sink, &cancel).await,
            None => session.retry(&mut sink, &cancel).await,
        };
        watcher.abort();
        println!();

        match result? {
            TurnOutcome::Completed { usage, .. } => {
                if let Some(usage) = usage {
                    println!("{}", format!("[{}]", format_usage(&usage)).dimmed());
                }
            }
            TurnOutcome::Cancelled { saved, .. } => {
                let note = if saved {
                    "[interrupted; partial reply saved]"
                } else {
                    "[interrupted; reply discarded, /retry to resend]"
                };
                println!("{}", note.yellow());
            }
        }
        println!();
        Ok(())
    }

    async fn save_conversation(session: &mut ChatSession) {
        let Some(id) = session.conversation_id().map(str::to_string) else {
            println!("{}", "Nothing to save yet.".yellow());
            return;
        };

        println!("{}", "Generating conversation title...".dimmed());
        let cancel = CancellationToken::new();
        let watcher = spawn_interrupt_watcher(cancel.clone());
        let title = session.generate_title(&cancel).await;
        watcher.abort();
        match title {
            Some(title) => println!("{}", format!("Conversation saved: {}", title).green()),
            None => println!(
                "{}",
                format!("Could not generate a title. Conversation saved with ID: {}", id)
                    .yellow()
            ),
        }
    }

    fn print_usage(session: &ChatSession, storage: &SqliteStorage) -> Result<()> {
        println!("\n{}", "Token Usage".bold());
        println!("Session:      {}", format_usage(&session.usage()));
        if let Some(id) = session.conversation_id() {
            let conversation = storage.get(id)?;
            println!("Conversation: {}", format_usage(&conversation.usage));
        }
        println!();
        Ok(())
    }

    fn print_welcome_banner(session: &ChatSession) {
        let config = session.config();
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                 oaichat Interactive Chat                     ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");
        println!("Profile: {}", config.profile.green());
        println!("Model:   {}", config.model.green());
        println!(
            "Mode:    {}\n",
            if config.stream { "streaming" } else { "no-stream" }.yellow()
        );
        println!("Type '/help' for available commands, '/exit' to quit\n");
    }

    /// Display details about the running session
    fn print_status_display(session: &ChatSession, storage: &SqliteStorage) -> Result<()> {
        let config = session.config();
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                     oaichat Session Status                   ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");
        println!("Profile:       {}", config.profile.green());
        println!("Model:         {}", config.model.green());
        println!(
            "Streaming:     {}",
            if config.stream { "on" } else { "off" }
        );
        if let Some(t) = config.temperature {
            println!("Temperature:   {}", t);
        }
        if let Some(n) = config.max_tokens {
            println!("Max tokens:    {}", n);
        }
        println!(
            "System prompt: {}",
            config
                .system_prompt
                .as_deref()
                .map(|p| truncate(p, 50))
                .unwrap_or_else(|| "-".to_string())
        );
        match session.conversation_id() {
            Some(id) => {
                let conversation = storage.get(id)?;
                println!("Conversation:  {}", conversation.short_id().cyan());
                println!("Title:         {}", conversation.display_title());
                println!("Messages:      {}", conversation.messages.len());
                if conversation.dangling_user().is_some() {
                    println!("{}", "Last message has no reply (/retry)".yellow());
                }
            }
            None => println!("Conversation:  {}", "(not started)".dimmed()),
        }
        println!("Database:      {}", storage.path().display());
        println!();
        Ok(())
    }
}

// One-shot send handler
pub mod send {
    //! One-shot request handler.
    //!
    //! Without `--save` no conversation is created; the reply is printed and
    //! forgotten. With `--save` the exchange goes through a [`ChatSession`]
    //! so it is stored and titled like an interactive turn.

    use super::*;
    use crate::providers::{create_provider, Message};
    use crate::session::{collect_response, ChatSession, TurnOutcome};

    /// Send one message and print the reply to stdout
    ///
    /// Status lines (usage, saved id) go to stderr so the reply can be piped.
    pub async fn run_send(ctx: &AppContext, message: String, args: ChatArgs, save: bool) -> Result<()> {
        let profile = ctx.config.resolve_profile(args.profile.as_deref())?;
        let session_config = build_session_config(&profile, &ctx.config.chat, &args, None)?;
        let provider = create_provider(&profile, ctx.config.chat.request_timeout_seconds)?;

        let cancel = CancellationToken::new();
        let watcher = spawn_interrupt_watcher(cancel.clone());
        let mut sink = |text: &str| print_fragment(text);

        if save {
            let storage = ctx.storage()?;
            let mut session = ChatSession::new(provider, storage, session_config);
            let outcome = session.send(&message, &mut sink, &cancel).await;
            watcher.abort();
            println!();

            match outcome? {
                TurnOutcome::Completed { usage, .. } => {
                    if let Some(usage) = usage {
                        eprintln!("{}", format!("[{}]", format_usage(&usage)).dimmed());
                    }
                }
                TurnOutcome::Cancelled { .. } => {
                    eprintln!("{}", "[interrupted]".yellow());
                    return Ok(());
                }
            }

            let id = session.conversation_id().unwrap_or_default().to_string();
            let cancel = CancellationToken::new();
            let watcher = spawn_interrupt_watcher(cancel.clone());
            let title = session.generate_title(&cancel).await;
            watcher.abort();
            match title {
                Some(title) => eprintln!("{}", format!("Saved as: {} ({})", title, &id).green()),
                None => eprintln!("{}", format!("Saved with ID: {}", id).green()),
            }
            return Ok(());
        }

        let mut messages = Vec::with_capacity(2);
        if let Some(prompt) = &session_config.system_prompt {
            messages.push(Message::system(prompt.clone()));
        }
        messages.push(Message::user(message));
        let request = session_config.request(messages);

        let result = collect_response(provider.as_ref(), &request, &mut sink, &cancel).await;
        watcher.abort();
        println!();

        let collected = result?;
        if collected.cancelled {
            eprintln!("{}", "[interrupted]".yellow());
        } else if let Some(usage) = collected.usage {
            eprintln!("{}", format!("[{}]", format_usage(&usage)).dimmed());
        }
        Ok(())
    }
}
