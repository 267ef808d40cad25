//! Model commands
//!
//! Lists the models an endpoint offers and sets a profile's default model.

use colored::Colorize;
use prettytable::{format, Table};

use super::AppContext;
use crate::cli::ModelCommand;
use crate::error::{OaichatError, Result};
use crate::providers::{create_provider, ModelInfo};

/// Handle model commands
pub async fn handle_model(ctx: &mut AppContext, command: ModelCommand) -> Result<()> {
    match command {
        ModelCommand::List { profile } => list_models(ctx, profile.as_deref()).await,
        ModelCommand::Set { model, profile } => set_model(ctx, &model, profile.as_deref()),
    }
}

/// List available models from a profile's endpoint
///
/// # Arguments
///
/// * `ctx` - Loaded configuration
/// * `profile_name` - Profile to query; the default profile if None
///
/// # Examples
///
/// ```no_run
/// use oaichat::commands::AppContext;
/// use oaichat::commands::models::list_models;
/// use oaichat::config::Config;
///
/// # async fn example() -> anyhow::Result<()> {
/// let ctx = AppContext {
///     config_path: "config.yaml".into(),
///     config: Config::load("config.yaml".as_ref())?,
///     db_path: None,
/// };
/// list_models(&ctx, Some("local")).await?;
/// # Ok(())
/// # }
/// ```
pub async fn list_models(ctx: &AppContext, profile_name: Option<&str>) -> Result<()> {
    let profile = ctx.config.resolve_profile(profile_name)?;
    tracing::info!("Listing models for profile: {}", profile.name);

    let provider = create_provider(&profile, ctx.config.chat.request_timeout_seconds)?;
    let models = provider.list_models().await?;

    if models.is_empty() {
        println!("No models available from profile: {}", profile.name);
        return Ok(());
    }

    output_models_table(&models, &profile.name, profile.default_model.as_deref());
    Ok(())
}

/// Set the default model of a profile
///
/// The model name is not checked against the endpoint, since many servers
/// accept models they do not list.
pub fn set_model(ctx: &mut AppContext, model: &str, profile_name: Option<&str>) -> Result<()> {
    let model = model.trim();
    if model.is_empty() {
        return Err(OaichatError::Config("Model name must not be empty".to_string()).into());
    }

    let name = match profile_name {
        Some(name) => name.to_string(),
        None => ctx.config.default_profile.clone().ok_or_else(|| {
            OaichatError::Config("No default profile. Pass --profile <name>".to_string())
        })?,
    };

    ctx.config.update_profile_model(&name, model)?;
    ctx.save_config()?;
    println!(
        "{}",
        format!("Default model for '{}' set to {}", name, model).green()
    );
    Ok(())
}

fn output_models_table(models: &[ModelInfo], profile_name: &str, current: Option<&str>) {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(prettytable::row!["".bold(), "Model".bold(), "Owned By".bold()]);

    for model in models {
        let marker = if current == Some(model.id.as_str()) {
            "*"
        } else {
            ""
        };
        table.add_row(prettytable::row![
            marker.green(),
            model.id.cyan(),
            model.owned_by.as_deref().unwrap_or("-")
        ]);
    }

    println!("\nModels available from {}:", profile_name.bold());
    table.printstd();
    if current.is_some() {
        println!("\n* profile default");
    }
    println!();
}
