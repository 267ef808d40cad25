//! Stored conversation commands
//!
//! Listing, viewing, resuming, deleting and exporting conversations kept in
//! the local database.

use std::path::{Path, PathBuf};

use colored::Colorize;
use prettytable::{format, Table};

use super::{confirm, truncate, AppContext};
use crate::cli::ConvoCommand;
use crate::error::{OaichatError, Result};
use crate::export::{export, export_filename, ExportFormat};
use crate::providers::Role;
use crate::storage::{Conversation, ConversationFilter, ConversationSummary, SqliteStorage};

const TITLE_COLUMN_CHARS: usize = 40;

/// Handle conversation commands
pub async fn handle_convo(ctx: &AppContext, command: ConvoCommand) -> Result<()> {
    let storage = ctx.storage()?;

    match command {
        ConvoCommand::List {
            profile,
            limit,
            search,
        } => {
            let filter = ConversationFilter {
                profile,
                search,
                // 0 lifts the limit
                limit: match limit.unwrap_or(ctx.config.chat.history_limit) {
                    0 => None,
                    n => Some(n),
                },
            };
            let conversations = storage.list(&filter)?;
            print_conversation_table(&conversations);
        }
        ConvoCommand::Show { id } => {
            let conversation = storage.get(&id)?;
            print_conversation(&conversation);
        }
        ConvoCommand::Resume {
            id,
            args,
            save_partial,
        } => {
            super::chat::run_chat(ctx, args, Some(id), save_partial).await?;
        }
        ConvoCommand::Delete { id, yes } => {
            let conversation = storage.get(&id)?;
            if !yes {
                let question = format!(
                    "Delete \"{}\" ({}, {} messages)?",
                    conversation.display_title(),
                    conversation.short_id(),
                    conversation.messages.len()
                );
                if !confirm(&question)? {
                    println!("{}", "Cancelled.".yellow());
                    return Ok(());
                }
            }
            let deleted = storage.delete(&conversation.id)?;
            println!("{}", format!("Deleted conversation {}", deleted).green());
        }
        ConvoCommand::Export { id, format, output } => {
            let format: ExportFormat = format.parse()?;
            let path = export_to_file(&storage, &id, format, output.as_deref())?;
            println!("{}", format!("Exported to {}", path.display()).green());
        }
    }

    Ok(())
}

/// Export a conversation and write it to disk
///
/// Without `output`, the file is named after the conversation title and
/// written to the current directory. Returns the path written.
pub fn export_to_file(
    storage: &SqliteStorage,
    id_or_prefix: &str,
    format: ExportFormat,
    output: Option<&Path>,
) -> Result<PathBuf> {
    let conversation = storage.get(id_or_prefix)?;
    let content = export(&conversation, format)?;
    let path = match output {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(export_filename(&conversation, format)),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(OaichatError::from)?;
    }
    std::fs::write(&path, content).map_err(OaichatError::from)?;
    tracing::info!("Exported {} as {} to {}", conversation.id, format, path.display());
    Ok(path)
}

fn print_conversation_table(conversations: &[ConversationSummary]) {
    if conversations.is_empty() {
        println!("{}", "No conversations found.".yellow());
        return;
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(prettytable::row![
        "ID".bold(),
        "Title".bold(),
        "Profile".bold(),
        "Model".bold(),
        "Messages".bold(),
        "Tokens".bold(),
        "Last Updated".bold()
    ]);

    for convo in conversations {
        let title = truncate(
            convo.title.as_deref().unwrap_or("Untitled"),
            TITLE_COLUMN_CHARS,
        );
        table.add_row(prettytable::row![
            convo.short_id().cyan(),
            title,
            convo.profile,
            convo.model,
            convo.message_count,
            convo.usage.total(),
            convo.updated_at.format("%Y-%m-%d %H:%M")
        ]);
    }

    println!("\nConversations:");
    table.printstd();
    println!();
    println!(
        "Use {} to continue one.",
        "oaichat convo resume <ID>".cyan()
    );
    println!();
}

fn print_conversation(conversation: &Conversation) {
    println!("\n{}", conversation.display_title().bold());
    println!("ID:      {}", conversation.id.cyan());
    println!("Profile: {}", conversation.profile);
    println!("Model:   {}", conversation.model);
    println!(
        "Created: {}",
        conversation.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "Updated: {}",
        conversation.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("Tokens:  {}", super::format_usage(&conversation.usage));
    println!();

    for message in &conversation.messages {
        let label = match message.role {
            Role::System => "System".magenta().bold(),
            Role::User => "You".green().bold(),
            Role::Assistant => "Assistant".blue().bold(),
        };
        println!("{}", label);
        println!("{}", message.content);
        if let Some(usage) = message.usage() {
            println!("{}", format!("[{}]", super::format_usage(&usage)).dimmed());
        }
        println!();
    }

    if conversation.dangling_user().is_some() {
        println!(
            "{}",
            "The last message has no reply. Resume the conversation and type /retry to resend it."
                .yellow()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::kind_of;
    use crate::providers::TokenUsage;
    use crate::storage::NewMessage;
    use tempfile::tempdir;

    fn seeded(dir: &Path) -> (SqliteStorage, String) {
        let storage = SqliteStorage::new_with_path(dir.join("history.db")).unwrap();
        let id = storage.create("local", "llama3").unwrap();
        storage.append(&id, NewMessage::user("Hi")).unwrap();
        storage
            .append(
                &id,
                NewMessage::assistant("Hello!", Some(TokenUsage::new(3, 2))),
            )
            .unwrap();
        storage.set_title(&id, "Greetings").unwrap();
        (storage, id)
    }

    #[test]
    fn test_export_to_explicit_path() {
        let dir = tempdir().unwrap();
        let (storage, id) = seeded(dir.path());
        let target = dir.path().join("out").join("chat.md");

        let written =
            export_to_file(&storage, &id[..8], ExportFormat::Markdown, Some(&target)).unwrap();
        assert_eq!(written, target);

        let text = std::fs::read_to_string(&target).unwrap();
        assert!(text.starts_with("# Greetings"));
        assert!(text.contains("### Assistant\n\nHello!"));
    }

    #[test]
    fn test_export_json_parses_back() {
        let dir = tempdir().unwrap();
        let (storage, id) = seeded(dir.path());
        let target = dir.path().join("chat.json");

        export_to_file(&storage, &id, ExportFormat::Json, Some(&target)).unwrap();
        let parsed =
            crate::export::from_json(&std::fs::read_to_string(&target).unwrap()).unwrap();
        assert_eq!(parsed, storage.get(&id).unwrap());
    }

    #[test]
    fn test_export_write_failure_is_typed() {
        let dir = tempdir().unwrap();
        let (storage, id) = seeded(dir.path());
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file").unwrap();

        let err = export_to_file(
            &storage,
            &id,
            ExportFormat::Markdown,
            Some(&blocker.join("chat.md")),
        )
        .unwrap_err();
        assert!(matches!(kind_of(&err), Some(OaichatError::Io(_))));
    }

    #[test]
    fn test_export_unknown_id() {
        let dir = tempdir().unwrap();
        let (storage, _) = seeded(dir.path());
        let err = export_to_file(
            &storage,
            "zzzz",
            ExportFormat::Json,
            Some(&dir.path().join("x.json")),
        )
        .unwrap_err();
        assert!(matches!(kind_of(&err), Some(OaichatError::NotFound { .. })));
        assert!(!dir.path().join("x.json").exists());
    }
}
