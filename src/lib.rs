//! oaichat - terminal client for OpenAI-compatible chat APIs
//!
//! This library provides the pieces behind the `oaichat` binary: provider
//! profiles, a streaming HTTP client, a local conversation store and the
//! chat session that ties them together.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `config`: Profiles, chat defaults and environment overrides
//! - `providers`: Provider trait and the OpenAI-compatible client
//! - `storage`: SQLite conversation store
//! - `session`: Chat session state machine
//! - `export`: Markdown and JSON export
//! - `commands`: CLI command handlers
//! - `cli`: Command-line interface definition
//! - `error`: Error types and result aliases
//!
//! # Example
//!
//! ```no_run
//! use oaichat::config::Config;
//! use oaichat::providers::create_provider;
//! use oaichat::session::{ChatSession, SessionConfig};
//! use oaichat::storage::SqliteStorage;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(&Config::default_path()?)?;
//!     let profile = config.resolve_profile(None)?;
//!     let provider = create_provider(&profile, config.chat.request_timeout_seconds)?;
//!     let session_config = SessionConfig::from_profile(&profile, &config.chat)?;
//!
//!     let mut session = ChatSession::new(provider, SqliteStorage::new()?, session_config);
//!     let mut print = |text: &str| print!("{}", text);
//!     session.send("Hello!", &mut print, &CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod export;
pub mod providers;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use config::{Config, Profile};
pub use error::{OaichatError, Result};
pub use session::{ChatSession, SessionConfig};
pub use storage::SqliteStorage;
