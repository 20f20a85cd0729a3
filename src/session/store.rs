//! SQLite-backed storage for sessions and messages.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use super::{Message, Metadata, Role, Session, SessionError, SessionResult, StorageResultExt};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        working_directory TEXT NOT NULL,
        git_branch TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}',
        message_count INTEGER NOT NULL DEFAULT 0
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_sessions_updated ON sessions (updated_at)",
    r#"CREATE TABLE IF NOT EXISTS messages (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        tool_call_id TEXT,
        token_count INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_messages_session ON messages (session_id, seq)",
];

const SESSION_COLUMNS: &str =
    "id, name, working_directory, git_branch, created_at, updated_at, metadata, message_count";

/// Embedded relational store. One writer connection; callers serialize
/// cross-process writes with a lock file.
#[derive(Clone, Debug)]
pub struct SessionStore {
    pool: SqlitePool,
    path: Option<PathBuf>,
}

impl SessionStore {
    /// Opens (creating if needed) the database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> SessionResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .storage_err_ctx("create store directory")?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .storage_err_ctx("open session store")?;

        let store = Self {
            pool,
            path: Some(path.to_path_buf()),
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Store that lives as long as the value; for tests and ephemeral runs.
    pub async fn in_memory() -> SessionResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .storage_err()?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .storage_err_ctx("open in-memory store")?;

        let store = Self { pool, path: None };
        store.migrate().await?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn migrate(&self) -> SessionResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .storage_err_ctx("migrate")?;
        }
        Ok(())
    }

    pub async fn insert_session(&self, session: &Session) -> SessionResult<()> {
        let metadata = serde_json::to_string(&session.metadata)?;
        sqlx::query(
            "INSERT INTO sessions (id, name, working_directory, git_branch, created_at, updated_at, metadata, message_count) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.name)
        .bind(session.working_directory.to_string_lossy().into_owned())
        .bind(&session.git_branch)
        .bind(session.created_at.timestamp_micros())
        .bind(session.updated_at.timestamp_micros())
        .bind(metadata)
        .bind(i64::try_from(session.message_count).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await
        .storage_err_ctx("insert session")?;
        Ok(())
    }

    pub async fn get_session(&self, id: &str) -> SessionResult<Option<Session>> {
        let row = sqlx::query(&format!("SELECT {} FROM sessions WHERE id = ?", SESSION_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .storage_err_ctx("get session")?;
        row.as_ref().map(session_from_row).transpose()
    }

    /// Newest first by `updated_at`; ties resolve to the later insert.
    pub async fn list_sessions(&self, limit: usize, offset: usize) -> SessionResult<Vec<Session>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM sessions ORDER BY updated_at DESC, rowid DESC LIMIT ? OFFSET ?",
            SESSION_COLUMNS
        ))
        .bind(to_i64(limit))
        .bind(to_i64(offset))
        .fetch_all(&self.pool)
        .await
        .storage_err_ctx("list sessions")?;
        rows.iter().map(session_from_row).collect()
    }

    pub async fn count_sessions(&self) -> SessionResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(&self.pool)
            .await
            .storage_err_ctx("count sessions")?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Deletes a session and, by cascade, its messages.
    pub async fn delete_session(&self, id: &str) -> SessionResult<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .storage_err_ctx("delete session")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_session_details(
        &self,
        id: &str,
        name: &str,
        metadata: &Metadata,
        updated_at: DateTime<Utc>,
    ) -> SessionResult<bool> {
        let metadata = serde_json::to_string(metadata)?;
        let result =
            sqlx::query("UPDATE sessions SET name = ?, metadata = ?, updated_at = ? WHERE id = ?")
                .bind(name)
                .bind(metadata)
                .bind(updated_at.timestamp_micros())
                .bind(id)
                .execute(&self.pool)
                .await
                .storage_err_ctx("update session")?;
        Ok(result.rows_affected() > 0)
    }

    /// Overrides `updated_at`, e.g. when importing sessions.
    pub async fn set_updated_at(&self, id: &str, updated_at: DateTime<Utc>) -> SessionResult<bool> {
        let result = sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(updated_at.timestamp_micros())
            .bind(id)
            .execute(&self.pool)
            .await
            .storage_err_ctx("set updated_at")?;
        Ok(result.rows_affected() > 0)
    }

    /// Appends a message and bumps the owning session in one transaction.
    pub async fn append_message(&self, message: &Message) -> SessionResult<()> {
        let mut tx = self.pool.begin().await.storage_err_ctx("begin")?;

        let touched = sqlx::query(
            "UPDATE sessions SET updated_at = ?, message_count = message_count + 1 WHERE id = ?",
        )
        .bind(message.created_at.timestamp_micros())
        .bind(&message.session_id)
        .execute(&mut *tx)
        .await
        .storage_err_ctx("touch session")?;
        if touched.rows_affected() == 0 {
            return Err(SessionError::NotFound {
                id: message.session_id.clone(),
            });
        }

        sqlx::query(
            "INSERT INTO messages (id, session_id, role, content, tool_call_id, token_count, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.session_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(&message.tool_call_id)
        .bind(i64::from(message.token_count))
        .bind(message.created_at.timestamp_micros())
        .execute(&mut *tx)
        .await
        .storage_err_ctx("insert message")?;

        tx.commit().await.storage_err_ctx("commit")?;
        Ok(())
    }

    /// All messages of a session in insertion order.
    pub async fn messages(&self, session_id: &str) -> SessionResult<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, content, tool_call_id, token_count, created_at \
             FROM messages WHERE session_id = ? ORDER BY seq ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .storage_err_ctx("load messages")?;
        rows.iter().map(message_from_row).collect()
    }

    pub async fn delete_updated_before(&self, cutoff: DateTime<Utc>) -> SessionResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE updated_at < ?")
            .bind(cutoff.timestamp_micros())
            .execute(&self.pool)
            .await
            .storage_err_ctx("delete expired sessions")?;
        Ok(result.rows_affected())
    }

    /// Deletes everything except the `keep` most recently updated sessions.
    pub async fn delete_beyond(&self, keep: usize) -> SessionResult<u64> {
        let result = sqlx::query(
            "DELETE FROM sessions WHERE id IN \
             (SELECT id FROM sessions ORDER BY updated_at DESC, rowid DESC LIMIT -1 OFFSET ?)",
        )
        .bind(to_i64(keep))
        .execute(&self.pool)
        .await
        .storage_err_ctx("trim sessions")?;
        Ok(result.rows_affected())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn timestamp(micros: i64) -> SessionResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(micros).ok_or_else(|| SessionError::Storage {
        message: format!("invalid timestamp {}", micros),
    })
}

fn session_from_row(row: &SqliteRow) -> SessionResult<Session> {
    let metadata: String = row.try_get("metadata").storage_err()?;
    let working_directory: String = row.try_get("working_directory").storage_err()?;
    let message_count: i64 = row.try_get("message_count").storage_err()?;
    Ok(Session {
        id: row.try_get("id").storage_err()?,
        name: row.try_get("name").storage_err()?,
        working_directory: PathBuf::from(working_directory),
        git_branch: row.try_get("git_branch").storage_err()?,
        created_at: timestamp(row.try_get("created_at").storage_err()?)?,
        updated_at: timestamp(row.try_get("updated_at").storage_err()?)?,
        metadata: serde_json::from_str(&metadata)?,
        message_count: u64::try_from(message_count).unwrap_or(0),
    })
}

fn message_from_row(row: &SqliteRow) -> SessionResult<Message> {
    let role: String = row.try_get("role").storage_err()?;
    let token_count: i64 = row.try_get("token_count").storage_err()?;
    Ok(Message {
        id: row.try_get("id").storage_err()?,
        session_id: row.try_get("session_id").storage_err()?,
        role: Role::from_str(&role).map_err(|message| SessionError::Storage { message })?,
        content: row.try_get("content").storage_err()?,
        tool_call_id: row.try_get("tool_call_id").storage_err()?,
        token_count: u32::try_from(token_count).unwrap_or(u32::MAX),
        created_at: timestamp(row.try_get("created_at").storage_err()?)?,
    })
}
