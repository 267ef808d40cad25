//! Integration tests for conversation persistence and export
//!
//! Tests that conversations survive reopening the database and that exports
//! reflect exactly what was stored.

use oaichat::error::{kind_of, OaichatError};
use oaichat::export::{export, from_json, ExportFormat};
use oaichat::providers::{Role, TokenUsage};
use oaichat::storage::{ConversationFilter, NewMessage, SqliteStorage};

mod common;

#[test]
fn test_conversation_survives_reopen() {
    let (storage, tmp) = common::create_temp_storage();
    let id = storage.create("work", "gpt-4o-mini").unwrap();
    storage
        .append(&id, NewMessage::system("You are terse."))
        .unwrap();
    storage.append(&id, NewMessage::user("Hi")).unwrap();
    storage
        .append(
            &id,
            NewMessage::assistant("Hello.", Some(TokenUsage::new(12, 2))),
        )
        .unwrap();
    drop(storage);

    let reopened = SqliteStorage::new_with_path(tmp.path().join("history.db")).unwrap();
    let conversation = reopened.get(&id).unwrap();

    assert_eq!(conversation.profile, "work");
    assert_eq!(conversation.system_prompt(), Some("You are terse."));
    let seqs: Vec<u32> = conversation.messages.iter().map(|m| m.seq).collect();
    assert_eq!(seqs, vec![0, 1, 2]);
    assert_eq!(conversation.usage, TokenUsage::new(12, 2));
    assert!(conversation.created_at <= conversation.updated_at);
}

#[test]
fn test_list_search_and_profile_filter() {
    let (storage, _tmp) = common::create_temp_storage();
    let rust = storage.create("work", "m").unwrap();
    storage.set_title(&rust, "Rust lifetimes").unwrap();
    let go = storage.create("home", "m").unwrap();
    storage.set_title(&go, "Go channels").unwrap();

    let found = storage
        .list(&ConversationFilter {
            search: Some("LIFETIME".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, rust);

    let home = storage
        .list(&ConversationFilter {
            profile: Some("home".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(home.len(), 1);
    assert_eq!(home[0].id, go);
}

#[test]
fn test_role_order_enforced_across_handles() {
    let (storage, tmp) = common::create_temp_storage();
    let id = storage.create("p", "m").unwrap();
    storage.append(&id, NewMessage::user("one")).unwrap();

    let other = SqliteStorage::new_with_path(tmp.path().join("history.db")).unwrap();
    let err = other.append(&id, NewMessage::user("two")).unwrap_err();
    assert!(matches!(
        kind_of(&err),
        Some(OaichatError::InvalidSequence(_))
    ));
    assert_eq!(storage.message_count(&id).unwrap(), 1);
}

#[test]
fn test_exports_match_stored_conversation() {
    let (storage, _tmp) = common::create_temp_storage();
    let id = storage.create("p", "llama3").unwrap();
    storage.append(&id, NewMessage::user("Ping")).unwrap();
    storage
        .append(&id, NewMessage::assistant("Pong", None))
        .unwrap();
    storage.set_title(&id, "Ping pong").unwrap();
    let conversation = storage.get(&id).unwrap();

    let json = export(&conversation, ExportFormat::Json).unwrap();
    let parsed = from_json(&json).unwrap();
    assert_eq!(parsed, conversation);
    assert_eq!(parsed.messages[1].role, Role::Assistant);

    let markdown = export(&conversation, ExportFormat::Markdown).unwrap();
    assert!(markdown.starts_with("# Ping pong"));
    assert!(markdown.contains("**Model:** llama3"));
    assert!(markdown.find("Ping\n").unwrap() < markdown.find("Pong\n").unwrap());
}

#[test]
fn test_delete_then_get_is_not_found() {
    let (storage, _tmp) = common::create_temp_storage();
    let id = storage.create("p", "m").unwrap();
    storage.append(&id, NewMessage::user("bye")).unwrap();

    assert_eq!(storage.delete(&id[..8]).unwrap(), id);
    let err = storage.get(&id).unwrap_err();
    assert!(matches!(kind_of(&err), Some(OaichatError::NotFound { .. })));
    assert_eq!(storage.count(None).unwrap(), 0);
}
