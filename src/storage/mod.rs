use crate::error::{OaichatError, Result};
use crate::providers::{Role, TokenUsage};
use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use directories::ProjectDirs;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod types;
pub use types::{
    check_sequence, Conversation, ConversationFilter, ConversationSummary, NewMessage,
    StoredMessage,
};

/// Environment variable that overrides the default database location
pub const DB_PATH_ENV: &str = "OAICHAT_DB_PATH";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    profile TEXT NOT NULL,
    model TEXT NOT NULL,
    title TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    prompt_tokens INTEGER NOT NULL DEFAULT 0,
    completion_tokens INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS messages (
    conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    seq INTEGER NOT NULL,
    role TEXT NOT NULL CHECK (role IN ('system', 'user', 'assistant')),
    content TEXT NOT NULL,
    prompt_tokens INTEGER,
    completion_tokens INTEGER,
    created_at TEXT NOT NULL,
    PRIMARY KEY (conversation_id, seq)
);
CREATE INDEX IF NOT EXISTS idx_conversations_updated ON conversations(updated_at);
CREATE INDEX IF NOT EXISTS idx_conversations_profile ON conversations(profile);
";

const SUMMARY_COLUMNS: &str = "c.id, c.profile, c.model, c.title, c.created_at, c.updated_at,
    c.prompt_tokens, c.completion_tokens,
    (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id)";

fn storage_err(context: &'static str) -> impl FnOnce(rusqlite::Error) -> anyhow::Error {
    move |e| OaichatError::Storage(format!("{}: {}", context, e)).into()
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: String, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_role(value: String, idx: usize) -> rusqlite::Result<Role> {
    value
        .parse::<Role>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        seq: row.get(0)?,
        role: parse_role(row.get(1)?, 1)?,
        content: row.get(2)?,
        prompt_tokens: row.get(3)?,
        completion_tokens: row.get(4)?,
        created_at: parse_timestamp(row.get(5)?, 5)?,
    })
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationSummary> {
    let count: i64 = row.get(8)?;
    Ok(ConversationSummary {
        id: row.get(0)?,
        profile: row.get(1)?,
        model: row.get(2)?,
        title: row.get(3)?,
        created_at: parse_timestamp(row.get(4)?, 4)?,
        updated_at: parse_timestamp(row.get(5)?, 5)?,
        usage: TokenUsage::new(row.get(6)?, row.get(7)?),
        message_count: usize::try_from(count).unwrap_or(0),
    })
}

/// Last message of a conversation, if any
fn last_message(conn: &Connection, id: &str) -> Result<Option<StoredMessage>> {
    conn.query_row(
        "SELECT seq, role, content, prompt_tokens, completion_tokens, created_at
         FROM messages WHERE conversation_id = ?1 ORDER BY seq DESC LIMIT 1",
        params![id],
        message_from_row,
    )
    .optional()
    .map_err(storage_err("Failed to read last message"))
}

/// Storage backend for conversation history
///
/// Every operation opens its own connection, so a `SqliteStorage` is cheap to
/// share and several processes can use the same database file.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    db_path: PathBuf,
}

impl SqliteStorage {
    /// Create a new storage instance
    ///
    /// Uses `$OAICHAT_DB_PATH` when set, otherwise `oaichat.db` in the
    /// user's data directory.
    pub fn new() -> Result<Self> {
        if let Ok(override_path) = std::env::var(DB_PATH_ENV) {
            if !override_path.is_empty() {
                return Self::new_with_path(override_path);
            }
        }

        Self::new_with_path(default_db_path()?)
    }

    /// Create a new storage instance that uses the specified database path.
    ///
    /// # Examples
    ///
    /// ```
    /// use oaichat::storage::SqliteStorage;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let storage = SqliteStorage::new_with_path(dir.path().join("chat.db")).unwrap();
    /// assert_eq!(storage.count(None).unwrap(), 0);
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create parent directory for database")
                    .map_err(|e| OaichatError::Storage(format!("{:#}", e)))?;
            }
        }

        let storage = Self { db_path };
        storage.init()?;
        tracing::debug!("Opened conversation store at {}", storage.db_path.display());
        Ok(storage)
    }

    /// Path of the database file
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path).map_err(storage_err("Failed to open database"))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(storage_err("Failed to set busy timeout"))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(storage_err("Failed to enable foreign keys"))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(storage_err("Failed to enable WAL"))?;
        conn.pragma_update(None, "synchronous", "FULL")
            .map_err(storage_err("Failed to set synchronous mode"))?;
        Ok(conn)
    }

    fn init(&self) -> Result<()> {
        let conn = self.open()?;
        conn.execute_batch(SCHEMA)
            .map_err(storage_err("Failed to create tables"))?;
        Ok(())
    }

    /// Start a new, empty conversation and return its id
    pub fn create(&self, profile: &str, model: &str) -> Result<String> {
        let conn = self.open()?;
        let id = uuid::Uuid::new_v4().to_string();
        let ts = now();

        conn.execute(
            "INSERT INTO conversations (id, profile, model, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, NULL, ?4, ?4)",
            params![id, profile, model, ts],
        )
        .map_err(storage_err("Failed to insert conversation"))?;

        tracing::info!("Created conversation {} (profile={}, model={})", id, profile, model);
        Ok(id)
    }

    /// Append a message to a conversation
    ///
    /// Runs in a single `IMMEDIATE` transaction: the role order is checked
    /// against the current last message, the next `seq` is assigned, and the
    /// conversation's `updated_at` and cumulative usage are bumped. The row is
    /// committed before this returns.
    ///
    /// # Errors
    ///
    /// * `OaichatError::NotFound` if the conversation does not exist
    /// * `OaichatError::InvalidSequence` if the role breaks alternation
    pub fn append(&self, id: &str, message: NewMessage) -> Result<StoredMessage> {
        let mut conn = self.open()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage_err("Failed to start transaction"))?;

        let exists = tx
            .query_row(
                "SELECT 1 FROM conversations WHERE id = ?1",
                params![id],
                |_| Ok(()),
            )
            .optional()
            .map_err(storage_err("Failed to query conversation"))?
            .is_some();
        if !exists {
            return Err(OaichatError::conversation_not_found(id).into());
        }

        let last = last_message(&tx, id)?;
        check_sequence(last.as_ref().map(|m| m.role), message.role)?;

        let seq = last.map(|m| m.seq + 1).unwrap_or(0);
        let created_at = Utc::now();
        let ts = created_at.to_rfc3339_opts(SecondsFormat::Micros, true);
        let prompt_tokens = message.usage.map(|u| u.prompt_tokens);
        let completion_tokens = message.usage.map(|u| u.completion_tokens);

        tx.execute(
            "INSERT INTO messages
                (conversation_id, seq, role, content, prompt_tokens, completion_tokens, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                seq,
                message.role.as_str(),
                message.content,
                prompt_tokens,
                completion_tokens,
                ts
            ],
        )
        .map_err(storage_err("Failed to insert message"))?;

        tx.execute(
            "UPDATE conversations SET
                updated_at = ?2,
                prompt_tokens = prompt_tokens + ?3,
                completion_tokens = completion_tokens + ?4
             WHERE id = ?1",
            params![
                id,
                ts,
                prompt_tokens.unwrap_or(0),
                completion_tokens.unwrap_or(0)
            ],
        )
        .map_err(storage_err("Failed to update conversation"))?;

        tx.commit()
            .map_err(storage_err("Failed to commit transaction"))?;

        tracing::debug!("Appended {} message seq={} to {}", message.role, seq, id);
        Ok(StoredMessage {
            seq,
            role: message.role,
            content: message.content,
            prompt_tokens,
            completion_tokens,
            created_at,
        })
    }

    /// Resolve a full id or unique id prefix to the full id
    ///
    /// An exact match wins; otherwise the prefix must match exactly one
    /// conversation. Wildcard characters in the input have no special
    /// meaning.
    ///
    /// # Errors
    ///
    /// * `OaichatError::NotFound` if nothing matches
    /// * `OaichatError::AmbiguousId` if several conversations match
    pub fn resolve_id(&self, id_or_prefix: &str) -> Result<String> {
        let conn = self.open()?;
        resolve_id_with(&conn, id_or_prefix)
    }

    /// Load a conversation with all of its messages
    pub fn get(&self, id_or_prefix: &str) -> Result<Conversation> {
        let conn = self.open()?;
        let id = resolve_id_with(&conn, id_or_prefix)?;

        let summary = conn
            .query_row(
                &format!("SELECT {} FROM conversations c WHERE c.id = ?1", SUMMARY_COLUMNS),
                params![id],
                summary_from_row,
            )
            .map_err(storage_err("Failed to query conversation"))?;

        let mut stmt = conn
            .prepare(
                "SELECT seq, role, content, prompt_tokens, completion_tokens, created_at
                 FROM messages WHERE conversation_id = ?1 ORDER BY seq ASC",
            )
            .map_err(storage_err("Failed to prepare statement"))?;
        let messages = stmt
            .query_map(params![id], message_from_row)
            .map_err(storage_err("Failed to query messages"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err("Failed to read messages"))?;

        Ok(Conversation {
            id: summary.id,
            profile: summary.profile,
            model: summary.model,
            title: summary.title,
            created_at: summary.created_at,
            updated_at: summary.updated_at,
            usage: summary.usage,
            messages,
        })
    }

    /// List conversations, most recently updated first
    pub fn list(&self, filter: &ConversationFilter) -> Result<Vec<ConversationSummary>> {
        let conn = self.open()?;
        let limit: i64 = filter
            .limit
            .and_then(|l| i64::try_from(l).ok())
            .unwrap_or(-1);
        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let sql = format!(
            "SELECT {} FROM conversations c
             WHERE (?1 IS NULL OR c.profile = ?1)
               AND (?2 IS NULL
                    OR instr(lower(COALESCE(c.title, '')), ?2) > 0
                    OR instr(c.id, ?2) > 0)
             ORDER BY c.updated_at DESC
             LIMIT ?3",
            SUMMARY_COLUMNS
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(storage_err("Failed to prepare statement"))?;
        let rows = stmt
            .query_map(params![filter.profile, search, limit], summary_from_row)
            .map_err(storage_err("Failed to query conversations"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err("Failed to read conversations"))?;

        Ok(rows)
    }

    /// Delete a conversation and its messages; returns the full id
    pub fn delete(&self, id_or_prefix: &str) -> Result<String> {
        let conn = self.open()?;
        let id = resolve_id_with(&conn, id_or_prefix)?;

        conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])
            .map_err(storage_err("Failed to delete conversation"))?;

        tracing::info!("Deleted conversation {}", id);
        Ok(id)
    }

    /// Set or replace the title
    pub fn set_title(&self, id_or_prefix: &str, title: &str) -> Result<()> {
        let conn = self.open()?;
        let id = resolve_id_with(&conn, id_or_prefix)?;
        conn.execute(
            "UPDATE conversations SET title = ?2 WHERE id = ?1",
            params![id, title],
        )
        .map_err(storage_err("Failed to update title"))?;
        Ok(())
    }

    /// Record the model now used by the conversation
    pub fn set_model(&self, id_or_prefix: &str, model: &str) -> Result<()> {
        let conn = self.open()?;
        let id = resolve_id_with(&conn, id_or_prefix)?;
        conn.execute(
            "UPDATE conversations SET model = ?2 WHERE id = ?1",
            params![id, model],
        )
        .map_err(storage_err("Failed to update model"))?;
        Ok(())
    }

    /// Remove the last message if it is an unanswered user message
    ///
    /// Returns the removed message, or `None` when the conversation ends with
    /// an assistant or system message (or is empty).
    pub fn discard_trailing_user(&self, id: &str) -> Result<Option<StoredMessage>> {
        let mut conn = self.open()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage_err("Failed to start transaction"))?;

        let last = match last_message(&tx, id)? {
            Some(m) if m.role == Role::User => m,
            _ => return Ok(None),
        };

        tx.execute(
            "DELETE FROM messages WHERE conversation_id = ?1 AND seq = ?2",
            params![id, last.seq],
        )
        .map_err(storage_err("Failed to delete message"))?;
        tx.commit()
            .map_err(storage_err("Failed to commit transaction"))?;

        tracing::debug!("Discarded unanswered user message seq={} in {}", last.seq, id);
        Ok(Some(last))
    }

    /// Number of stored messages in a conversation
    pub fn message_count(&self, id: &str) -> Result<usize> {
        let conn = self.open()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                params![id],
                |r| r.get(0),
            )
            .map_err(storage_err("Failed to count messages"))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Number of conversations, optionally for one profile
    pub fn count(&self, profile: Option<&str>) -> Result<usize> {
        let conn = self.open()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM conversations WHERE (?1 IS NULL OR profile = ?1)",
                params![profile],
                |r| r.get(0),
            )
            .map_err(storage_err("Failed to count conversations"))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

/// Default database location in the user's data directory
pub fn default_db_path() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("", "", "oaichat")
        .ok_or_else(|| OaichatError::Storage("Could not determine data directory".into()))?;
    Ok(proj_dirs.data_dir().join("oaichat.db"))
}

fn resolve_id_with(conn: &Connection, id_or_prefix: &str) -> Result<String> {
    let needle = id_or_prefix.trim();
    if needle.is_empty() {
        return Err(OaichatError::conversation_not_found(id_or_prefix).into());
    }

    let exact = conn
        .query_row(
            "SELECT id FROM conversations WHERE id = ?1",
            params![needle],
            |r| r.get::<_, String>(0),
        )
        .optional()
        .map_err(storage_err("Failed to query conversation"))?;
    if let Some(id) = exact {
        return Ok(id);
    }

    // substr comparison keeps '%' and '_' literal, unlike LIKE.
    let mut stmt = conn
        .prepare(
            "SELECT id FROM conversations
             WHERE substr(id, 1, length(?1)) = ?1
             ORDER BY id",
        )
        .map_err(storage_err("Failed to prepare statement"))?;
    let mut matches = stmt
        .query_map(params![needle], |r| r.get::<_, String>(0))
        .map_err(storage_err("Failed to query conversations"))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(storage_err("Failed to read conversations"))?;

    match matches.len() {
        0 => Err(OaichatError::conversation_not_found(needle).into()),
        1 => Ok(matches.remove(0)),
        _ => Err(OaichatError::AmbiguousId {
            prefix: needle.to_string(),
            matches,
        }
        .into()),
    }
}
