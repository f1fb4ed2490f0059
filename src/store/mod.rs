//! Durable conversation store backed by SQLite
//!
//! Three append-mostly tables: `sessions`, `messages`, `tool_events`. The
//! database runs in WAL mode so a concurrent reader (e.g. a history view)
//! never blocks the writer. Rows are immutable once written; ordering within
//! a session is the AUTOINCREMENT rowid, which matches append order.
//!
//! The store is an injected handle with an explicit lifecycle: opened once at
//! process start, cloned into whoever needs it (clones share the pool), and
//! closed at shutdown.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid role: {0}")]
    InvalidRole(String),
    #[error("invalid timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Message author role. Closed set, enforced by a CHECK constraint as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            other => Err(StoreError::InvalidRole(other.to_string())),
        }
    }
}

/// One persisted conversation.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

/// One persisted chat message.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: i64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Audit record of one tool call: serialized arguments and result.
#[derive(Debug, Clone)]
pub struct ToolEventRecord {
    pub id: i64,
    pub session_id: String,
    pub tool_name: String,
    pub tool_args: JsonValue,
    pub tool_result: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// Summary row for session listings.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub message_count: i64,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES sessions(id),
    role TEXT NOT NULL CHECK (role IN ('system','user','assistant','tool')),
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tool_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES sessions(id),
    tool_name TEXT NOT NULL,
    tool_args TEXT NOT NULL,
    tool_result TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id);
CREATE INDEX IF NOT EXISTS idx_tool_events_session ON tool_events(session_id);
"#;

/// Handle to the conversation database. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    /// Open (creating if missing) a file-backed store.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        // Pragmas go through the connect options so every pooled connection
        // gets them, not just the first one opened. WAL so history readers
        // never block the appenders.
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::init(pool).await
    }

    /// Open an in-memory store. Single connection: every pooled connection
    /// would otherwise get its own empty database.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::init(pool).await
    }

    async fn init(pool: SqlitePool) -> Result<Self> {
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&pool).await?;
        }

        Ok(Self { pool })
    }

    /// Close the underlying pool. Part of the explicit shutdown path.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create a new session with a fresh time-sortable id.
    pub async fn create_session(&self) -> Result<SessionRecord> {
        let id = uuid::Uuid::now_v7().to_string();
        let created_at = Utc::now();

        sqlx::query("INSERT INTO sessions (id, created_at) VALUES (?, ?)")
            .bind(&id)
            .bind(created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(SessionRecord { id, created_at })
    }

    /// Register a session id if it does not exist yet.
    ///
    /// A reconnecting transport resumes against the same session id, so this
    /// must be idempotent.
    pub async fn ensure_session(&self, session_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO sessions (id, created_at) VALUES (?, ?)")
            .bind(session_id)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Append one message. Returns the assigned row id.
    pub async fn append_message(&self, session_id: &str, role: Role, content: &str) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO messages (session_id, role, content, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(role.as_str())
        .bind(content)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Append the audit record for one terminated tool call.
    pub async fn append_tool_event(
        &self,
        session_id: &str,
        tool_name: &str,
        tool_args: &JsonValue,
        tool_result: &JsonValue,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO tool_events (session_id, tool_name, tool_args, tool_result, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(tool_name)
        .bind(serde_json::to_string(tool_args)?)
        .bind(serde_json::to_string(tool_result)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// All messages of a session, in append order.
    pub async fn session_messages(&self, session_id: &str) -> Result<Vec<MessageRecord>> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, content, created_at FROM messages \
             WHERE session_id = ? ORDER BY id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    /// All tool events of a session, in append order.
    pub async fn session_tool_events(&self, session_id: &str) -> Result<Vec<ToolEventRecord>> {
        let rows = sqlx::query(
            "SELECT id, session_id, tool_name, tool_args, tool_result, created_at \
             FROM tool_events WHERE session_id = ? ORDER BY id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(tool_event_from_row).collect()
    }

    /// Most recent sessions with message counts, newest first.
    pub async fn recent_sessions(&self, limit: i64) -> Result<Vec<SessionSummary>> {
        let rows = sqlx::query(
            "SELECT s.id, s.created_at, COUNT(m.id) AS message_count \
             FROM sessions s LEFT JOIN messages m ON s.id = m.session_id \
             GROUP BY s.id ORDER BY s.created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(SessionSummary {
                    id: row.try_get("id")?,
                    created_at: parse_timestamp(row.try_get("created_at")?)?,
                    message_count: row.try_get("message_count")?,
                })
            })
            .collect()
    }

    /// Substring search over message content, newest first.
    pub async fn search_messages(&self, query: &str, limit: i64) -> Result<Vec<MessageRecord>> {
        // Backslash first: it is the ESCAPE character, so a literal one in
        // the query must itself be escaped before % and _.
        let pattern = format!(
            "%{}%",
            query
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_")
        );
        let rows = sqlx::query(
            "SELECT id, session_id, role, content, created_at FROM messages \
             WHERE content LIKE ? ESCAPE '\\' ORDER BY id DESC LIMIT ?",
        )
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }
}

fn parse_timestamp(raw: String) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&raw)?.with_timezone(&Utc))
}

fn message_from_row(row: &SqliteRow) -> Result<MessageRecord> {
    let role: String = row.try_get("role")?;
    Ok(MessageRecord {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        role: Role::parse(&role)?,
        content: row.try_get("content")?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
    })
}

fn tool_event_from_row(row: &SqliteRow) -> Result<ToolEventRecord> {
    let args: String = row.try_get("tool_args")?;
    let result: String = row.try_get("tool_result")?;
    Ok(ToolEventRecord {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        tool_name: row.try_get("tool_name")?,
        tool_args: serde_json::from_str(&args)?,
        tool_result: serde_json::from_str(&result)?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_messages_keep_append_order() {
        let store = SessionStore::open_in_memory().await.unwrap();
        let session = store.create_session().await.unwrap();

        for i in 0..10 {
            store
                .append_message(&session.id, Role::User, &format!("msg-{}", i))
                .await
                .unwrap();
        }

        let messages = store.session_messages(&session.id).await.unwrap();
        assert_eq!(messages.len(), 10);
        for (i, msg) in messages.iter().enumerate() {
            assert_eq!(msg.content, format!("msg-{}", i));
        }
        // Row ids are strictly increasing in append order.
        assert!(messages.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path().join("sessions.db")).await.unwrap();
        let session = store.create_session().await.unwrap();

        let mut handles = Vec::new();
        for writer in 0..8 {
            let store = store.clone();
            let session_id = session.id.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    store
                        .append_message(&session_id, Role::User, &format!("w{}-{}", writer, i))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let messages = store.session_messages(&session.id).await.unwrap();
        assert_eq!(messages.len(), 200);

        // Each writer's own messages appear in the order it appended them.
        for writer in 0..8 {
            let prefix = format!("w{}-", writer);
            let seq: Vec<usize> = messages
                .iter()
                .filter(|m| m.content.starts_with(&prefix))
                .map(|m| m.content[prefix.len()..].parse().unwrap())
                .collect();
            assert_eq!(seq, (0..25).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_tool_event_roundtrip() {
        let store = SessionStore::open_in_memory().await.unwrap();
        let session = store.create_session().await.unwrap();

        let args = json!({"tool": "execute_code", "runtime": "python", "source": "print(2+2)"});
        let result = json!({"status": "success", "stdout": "4\n", "exit_code": 0});
        store
            .append_tool_event(&session.id, "execute_code", &args, &result)
            .await
            .unwrap();

        let events = store.session_tool_events(&session.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tool_name, "execute_code");
        assert_eq!(events[0].tool_args, args);
        assert_eq!(events[0].tool_result, result);
    }

    #[tokio::test]
    async fn test_ensure_session_is_idempotent() {
        let store = SessionStore::open_in_memory().await.unwrap();
        store.ensure_session("abc").await.unwrap();
        store.ensure_session("abc").await.unwrap();

        let sessions = store.recent_sessions(10).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "abc");
    }

    #[tokio::test]
    async fn test_recent_sessions_counts_messages() {
        let store = SessionStore::open_in_memory().await.unwrap();
        let a = store.create_session().await.unwrap();
        let b = store.create_session().await.unwrap();

        store.append_message(&a.id, Role::User, "hello").await.unwrap();
        store.append_message(&a.id, Role::Assistant, "hi").await.unwrap();

        let summaries = store.recent_sessions(10).await.unwrap();
        assert_eq!(summaries.len(), 2);
        let for_a = summaries.iter().find(|s| s.id == a.id).unwrap();
        let for_b = summaries.iter().find(|s| s.id == b.id).unwrap();
        assert_eq!(for_a.message_count, 2);
        assert_eq!(for_b.message_count, 0);
    }

    #[tokio::test]
    async fn test_search_messages() {
        let store = SessionStore::open_in_memory().await.unwrap();
        let session = store.create_session().await.unwrap();
        store.append_message(&session.id, Role::User, "find primes below 100").await.unwrap();
        store.append_message(&session.id, Role::Assistant, "done").await.unwrap();

        let hits = store.search_messages("primes", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].role, Role::User);

        let none = store.search_messages("nonexistent", 10).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_search_escapes_like_metacharacters() {
        let store = SessionStore::open_in_memory().await.unwrap();
        let session = store.create_session().await.unwrap();
        store
            .append_message(&session.id, Role::User, r"saved to C:\temp\out.txt")
            .await
            .unwrap();
        store
            .append_message(&session.id, Role::User, "progress 50%_done")
            .await
            .unwrap();
        store
            .append_message(&session.id, Role::User, "progress 50x done")
            .await
            .unwrap();

        // A literal backslash in the query must not leave a dangling escape.
        let hits = store.search_messages(r"\temp", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains(r"C:\temp"));

        // % and _ match literally, not as LIKE wildcards.
        let hits = store.search_messages("50%_", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("50%_done"));
    }

    #[tokio::test]
    async fn test_foreign_keys_enforced_on_every_connection() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path().join("sessions.db")).await.unwrap();

        // Hit the pool from several tasks so more than one connection gets
        // opened; each must reject a message without a parent session.
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append_message("no-such-session", Role::User, "orphan")
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_err());
        }
    }

    #[tokio::test]
    async fn test_invalid_role_rejected() {
        assert!(Role::parse("operator").is_err());
        assert_eq!(Role::parse("tool").unwrap(), Role::Tool);
    }
}
