//! Profile management commands
//!
//! Profiles are stored in the config file. Every change is validated and
//! written back before the command reports success.

use colored::Colorize;
use prettytable::{format, Table};

use super::AppContext;
use crate::cli::ProfileCommand;
use crate::config::{Profile, ProfileSettings, ProfileUpdate};
use crate::error::{OaichatError, Result};

/// Handle profile commands
///
/// Takes the context mutably since most subcommands rewrite the config.
pub fn handle_profile(ctx: &mut AppContext, command: ProfileCommand) -> Result<()> {
    match command {
        ProfileCommand::Add {
            name,
            base_url,
            api_key,
            model,
            system,
            temperature,
            max_tokens,
            default,
        } => {
            let settings = ProfileSettings {
                default_model: model,
                system_prompt: system,
                temperature,
                max_tokens,
                ..ProfileSettings::new(base_url, api_key)
            };
            ctx.config.add_profile(&name, settings, default)?;
            ctx.save_config()?;

            let profile = ctx.config.get_profile(&name)?;
            println!("{}", format!("Added profile '{}'", name).green());
            if profile.is_default {
                println!("'{}' is the default profile.", name);
            }
        }
        ProfileCommand::Edit {
            name,
            base_url,
            api_key,
            model,
            system,
            temperature,
            max_tokens,
        } => {
            let update = ProfileUpdate {
                base_url,
                api_key,
                default_model: model,
                system_prompt: system,
                temperature,
                max_tokens,
            };
            if update.is_empty() {
                return Err(OaichatError::Config(
                    "Nothing to change. Pass at least one field, e.g. --model".to_string(),
                )
                .into());
            }
            let profile = ctx.config.update_profile(&name, update)?;
            ctx.save_config()?;
            println!("{}", format!("Updated profile '{}'", name).green());
            print_profile(&profile);
        }
        ProfileCommand::List => {
            print_profile_table(&ctx.config.list_profiles());
        }
        ProfileCommand::Show { name } => {
            let profile = ctx.config.get_profile(&name)?;
            print_profile(&profile);
        }
        ProfileCommand::SetDefault { name } => {
            ctx.config.set_default_profile(&name)?;
            ctx.save_config()?;
            println!("{}", format!("'{}' is now the default profile", name).green());
        }
        ProfileCommand::Remove { name } => {
            let promoted = ctx.config.remove_profile(&name)?;
            ctx.save_config()?;
            println!("{}", format!("Removed profile '{}'", name).green());
            if let Some(promoted) = promoted {
                println!("'{}' is now the default profile.", promoted);
            } else if ctx.config.profiles.is_empty() {
                println!("{}", "No profiles left.".yellow());
            }
        }
    }

    Ok(())
}

fn print_profile_table(profiles: &[Profile]) {
    if profiles.is_empty() {
        println!("{}", "No profiles configured.".yellow());
        println!(
            "Add one with {}",
            "oaichat profile add <name> --base-url <url> --api-key <key>".cyan()
        );
        return;
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(prettytable::row![
        "".bold(),
        "Name".bold(),
        "Base URL".bold(),
        "Model".bold(),
        "API Key".bold()
    ]);

    for profile in profiles {
        let marker = if profile.is_default { "*" } else { "" };
        table.add_row(prettytable::row![
            marker.green(),
            profile.name.cyan(),
            profile.base_url,
            profile.default_model.as_deref().unwrap_or("-"),
            profile.masked_api_key()
        ]);
    }

    println!("\nProfiles:");
    table.printstd();
    println!("\n* default profile\n");
}

fn print_profile(profile: &Profile) {
    let or_dash = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());

    println!("\n{}", profile.name.bold());
    println!("Default:       {}", if profile.is_default { "yes" } else { "no" });
    println!("Base URL:      {}", profile.base_url);
    println!("API key:       {}", profile.masked_api_key());
    println!("Model:         {}", or_dash(profile.default_model.clone()));
    println!("System prompt: {}", or_dash(profile.system_prompt.clone()));
    println!(
        "Temperature:   {}",
        or_dash(profile.temperature.map(|t| t.to_string()))
    );
    println!(
        "Max tokens:    {}",
        or_dash(profile.max_tokens.map(|n| n.to_string()))
    );
    println!();
}
