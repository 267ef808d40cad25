//! oaichat - terminal client for OpenAI-compatible chat APIs
//!
#![doc = "Main entry point for the oaichat CLI."]

use std::process::ExitCode;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use oaichat::cli::{Cli, Commands};
use oaichat::commands::{self, AppContext};
use oaichat::error::Result;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            commands::print_error(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut ctx = AppContext::load(&cli)?;
    if let Some(db_path) = &ctx.db_path {
        tracing::debug!("Using database override: {}", db_path.display());
    }

    match cli.command {
        Commands::Chat {
            args,
            resume,
            save_partial,
        } => {
            if let Some(r) = &resume {
                tracing::debug!("Resuming conversation: {}", r);
            }
            commands::chat::run_chat(&ctx, args, resume, save_partial).await
        }
        Commands::Send {
            message,
            args,
            save,
        } => commands::send::run_send(&ctx, message, args, save).await,
        Commands::Convo { command } => commands::convo::handle_convo(&ctx, command).await,
        Commands::Profile { command } => commands::profile::handle_profile(&mut ctx, command),
        Commands::Model { command } => commands::models::handle_model(&mut ctx, command).await,
    }
}

/// Initialize tracing subscriber with environment filter
///
/// Logs go to stderr so they never mix with replies on stdout.
fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "oaichat=debug" } else { "oaichat=warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
