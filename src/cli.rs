//! Command-line interface definition for oaichat
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for chatting, conversation history, profiles and
//! models.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// oaichat - chat with OpenAI-compatible APIs from the terminal
///
/// Manage provider profiles, hold interactive or one-shot conversations,
/// and browse or export the stored history.
#[derive(Parser, Debug, Clone)]
#[command(name = "oaichat")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "OAICHAT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to the conversation database
    #[arg(long, global = true, env = "OAICHAT_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Parse a temperature and check it is within `0.0..=2.0`
fn parse_temperature(value: &str) -> Result<f32, String> {
    let t: f32 = value
        .parse()
        .map_err(|_| format!("'{}' is not a number", value))?;
    if !(0.0..=2.0).contains(&t) {
        return Err(format!("temperature must be between 0.0 and 2.0, got {}", t));
    }
    Ok(t)
}

fn parse_max_tokens(value: &str) -> Result<u32, String> {
    match value.parse::<u32>() {
        Ok(0) => Err("max tokens must be greater than 0".to_string()),
        Ok(n) => Ok(n),
        Err(_) => Err(format!("'{}' is not a positive integer", value)),
    }
}

/// Request options shared by `chat`, `send` and `convo resume`
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct ChatArgs {
    /// Profile to use (defaults to the configured default profile)
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Model to use instead of the profile's default
    #[arg(short, long)]
    pub model: Option<String>,

    /// System prompt for this session
    #[arg(short, long)]
    pub system: Option<String>,

    /// Sampling temperature (0.0-2.0)
    #[arg(short, long, value_parser = parse_temperature)]
    pub temperature: Option<f32>,

    /// Maximum completion tokens
    #[arg(long, value_parser = parse_max_tokens)]
    pub max_tokens: Option<u32>,

    /// Wait for the full reply instead of streaming it
    #[arg(long)]
    pub no_stream: bool,
}

/// Available commands for oaichat
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start an interactive chat session
    Chat {
        #[command(flatten)]
        args: ChatArgs,

        /// Resume a stored conversation by id or id prefix
        #[arg(short, long)]
        resume: Option<String>,

        /// Keep the partial reply when a response is interrupted
        #[arg(long)]
        save_partial: bool,
    },

    /// Send a single message and print the reply
    Send {
        /// Message text
        message: String,

        #[command(flatten)]
        args: ChatArgs,

        /// Store the exchange in the conversation history
        #[arg(long)]
        save: bool,
    },

    /// Browse, resume, export and delete stored conversations
    Convo {
        #[command(subcommand)]
        command: ConvoCommand,
    },

    /// Manage provider profiles
    Profile {
        #[command(subcommand)]
        command: ProfileCommand,
    },

    /// List or select models
    Model {
        #[command(subcommand)]
        command: ModelCommand,
    },
}

/// Conversation history subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConvoCommand {
    /// List stored conversations, most recent first
    List {
        /// Only conversations for this profile
        #[arg(short, long)]
        profile: Option<String>,

        /// Maximum number of rows (defaults to chat.history_limit)
        #[arg(short, long)]
        limit: Option<usize>,

        /// Filter by title or id substring
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Print a conversation
    Show {
        /// Conversation id or unique prefix
        id: String,
    },

    /// Continue a conversation interactively
    Resume {
        /// Conversation id or unique prefix
        id: String,

        #[command(flatten)]
        args: ChatArgs,

        /// Keep the partial reply when a response is interrupted
        #[arg(long)]
        save_partial: bool,
    },

    /// Delete a conversation
    Delete {
        /// Conversation id or unique prefix
        id: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Export a conversation to Markdown or JSON
    Export {
        /// Conversation id or unique prefix
        id: String,

        /// Output format: md, markdown or json
        #[arg(short, long, default_value = "md")]
        format: String,

        /// Output file (defaults to a name derived from the title)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Profile management subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ProfileCommand {
    /// Add a profile
    Add {
        /// Profile name (letters, digits, '_' and '-')
        name: String,

        /// API base URL, e.g. https://api.openai.com/v1
        #[arg(long)]
        base_url: String,

        /// API key
        #[arg(long)]
        api_key: String,

        /// Default model
        #[arg(short, long)]
        model: Option<String>,

        /// Default system prompt
        #[arg(short, long)]
        system: Option<String>,

        /// Default temperature (0.0-2.0)
        #[arg(short, long, value_parser = parse_temperature)]
        temperature: Option<f32>,

        /// Default maximum completion tokens
        #[arg(long, value_parser = parse_max_tokens)]
        max_tokens: Option<u32>,

        /// Make this the default profile
        #[arg(long)]
        default: bool,
    },

    /// Change fields of a profile
    Edit {
        /// Profile name
        name: String,

        #[arg(long)]
        base_url: Option<String>,

        #[arg(long)]
        api_key: Option<String>,

        /// Default model (empty string clears it)
        #[arg(short, long)]
        model: Option<String>,

        /// Default system prompt (empty string clears it)
        #[arg(short, long)]
        system: Option<String>,

        #[arg(short, long, value_parser = parse_temperature)]
        temperature: Option<f32>,

        #[arg(long, value_parser = parse_max_tokens)]
        max_tokens: Option<u32>,
    },

    /// List profiles
    List,

    /// Show a profile (API key masked)
    Show {
        /// Profile name
        name: String,
    },

    /// Make a profile the default
    SetDefault {
        /// Profile name
        name: String,
    },

    /// Remove a profile
    Remove {
        /// Profile name
        name: String,
    },
}

/// Model subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ModelCommand {
    /// List models offered by the endpoint
    List {
        /// Profile to query
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Set a profile's default model
    Set {
        /// Model identifier
        model: String,

        /// Profile to update
        #[arg(short, long)]
        profile: Option<String>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
