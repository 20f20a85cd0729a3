//! Session lifecycle management.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use super::pointer::{CurrentSessionPointer, detect_git_branch};
use super::store::SessionStore;
use super::tokens::{count_tokens, select_window, total_tokens};
use super::{
    CreateSessionOptions, GetOrCreateOptions, ListOptions, Message, MessageQuery, Metadata,
    NewMessage, Session, SessionContext, SessionError, SessionResult, StorageResultExt,
};
use crate::common::FileLock;
use crate::security::normalize_path;

pub const DATABASE_FILE: &str = "sessions.db";
pub const POINTER_FILE: &str = "current_session";

pub struct SessionManager {
    store: SessionStore,
    lock_path: Option<PathBuf>,
    pointer: Option<CurrentSessionPointer>,
    /// Last timestamp handed out, in micros; keeps ordering strict within a process.
    clock: AtomicI64,
}

impl SessionManager {
    /// Wraps a store. File-backed stores get a sibling `.lock` file.
    pub fn new(store: SessionStore) -> Self {
        let lock_path = store.path().map(|p| {
            let mut name = p.as_os_str().to_owned();
            name.push(".lock");
            PathBuf::from(name)
        });
        Self {
            store,
            lock_path,
            pointer: None,
            clock: AtomicI64::new(0),
        }
    }

    pub fn with_pointer(mut self, pointer: CurrentSessionPointer) -> Self {
        self.pointer = Some(pointer);
        self
    }

    /// Opens the database and current-session pointer inside `data_dir`.
    pub async fn open(data_dir: impl AsRef<Path>) -> SessionResult<Self> {
        let data_dir = data_dir.as_ref();
        let store = SessionStore::open(data_dir.join(DATABASE_FILE)).await?;
        Ok(Self::new(store).with_pointer(CurrentSessionPointer::new(data_dir.join(POINTER_FILE))))
    }

    /// Opens the store under the platform data directory.
    pub async fn open_default() -> SessionResult<Self> {
        let dir = crate::config::data_dir().ok_or_else(|| SessionError::Storage {
            message: "no data directory available".into(),
        })?;
        Self::open(dir).await
    }

    pub async fn in_memory() -> SessionResult<Self> {
        Ok(Self::new(SessionStore::in_memory().await?))
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn count_tokens(&self, text: &str) -> u32 {
        count_tokens(text)
    }

    async fn write_lock(&self) -> SessionResult<Option<FileLock>> {
        match &self.lock_path {
            Some(path) => Ok(Some(
                FileLock::acquire(path.clone())
                    .await
                    .storage_err_ctx("acquire session lock")?,
            )),
            None => Ok(None),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now().timestamp_micros();
        let mut last = self.clock.load(Ordering::Relaxed);
        loop {
            let next = wall.max(last + 1);
            match self
                .clock
                .compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return DateTime::from_timestamp_micros(next).unwrap_or_else(Utc::now),
                Err(actual) => last = actual,
            }
        }
    }

    pub async fn create_session(&self, options: CreateSessionOptions) -> SessionResult<Session> {
        let working_directory = match options.working_directory {
            Some(dir) => dir,
            None => std::env::current_dir().storage_err_ctx("current directory")?,
        };
        let working_directory = normalize_path(&std::path::absolute(&working_directory).unwrap_or(working_directory));
        let git_branch = match options.git_branch {
            Some(branch) => Some(branch),
            None => detect_git_branch(&working_directory).await,
        };

        let now = self.now();
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            name: options
                .name
                .unwrap_or_else(|| format!("Session {}", now.format("%Y-%m-%d %H:%M"))),
            working_directory,
            git_branch,
            created_at: now,
            updated_at: now,
            metadata: options.metadata,
            message_count: 0,
        };

        {
            let _lock = self.write_lock().await?;
            self.store.insert_session(&session).await?;
        }
        self.set_current(&session.id).await;

        tracing::info!(session_id = %session.id, name = %session.name, "Created session");
        Ok(session)
    }

    /// `None` when the session does not exist.
    pub async fn get_session(&self, id: &str) -> SessionResult<Option<Session>> {
        self.store.get_session(id).await
    }

    /// Most recently updated first.
    pub async fn list_sessions(&self, options: ListOptions) -> SessionResult<Vec<Session>> {
        self.store.list_sessions(options.limit, options.offset).await
    }

    /// Deletes the session and its messages. Returns whether it existed.
    pub async fn delete_session(&self, id: &str) -> SessionResult<bool> {
        let deleted = {
            let _lock = self.write_lock().await?;
            self.store.delete_session(id).await?
        };
        if deleted {
            tracing::info!(session_id = %id, "Deleted session");
            if self.current_session_id().await?.as_deref() == Some(id) {
                self.clear_current_session().await?;
            }
        }
        Ok(deleted)
    }

    pub async fn add_message(&self, session_id: &str, message: NewMessage) -> SessionResult<Message> {
        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            token_count: count_tokens(&message.content),
            role: message.role,
            content: message.content,
            tool_call_id: message.tool_call_id,
            created_at: self.now(),
        };

        let _lock = self.write_lock().await?;
        self.store.append_message(&message).await?;
        tracing::debug!(
            session_id,
            role = %message.role,
            tokens = message.token_count,
            "Appended message"
        );
        Ok(message)
    }

    /// Chronological history, optionally limited to the newest messages that
    /// fit `max_tokens`. Unknown sessions yield an empty list.
    pub async fn get_messages(&self, session_id: &str, query: MessageQuery) -> SessionResult<Vec<Message>> {
        let messages = self.store.messages(session_id).await?;
        Ok(match query.max_tokens {
            Some(budget) => select_window(messages, budget),
            None => messages,
        })
    }

    pub async fn get_session_context(&self, id: &str) -> SessionResult<Option<SessionContext>> {
        self.get_session_context_with(id, MessageQuery::default()).await
    }

    pub async fn get_session_context_with(
        &self,
        id: &str,
        query: MessageQuery,
    ) -> SessionResult<Option<SessionContext>> {
        let Some(session) = self.store.get_session(id).await? else {
            return Ok(None);
        };
        let messages = self.get_messages(id, query).await?;
        let total_tokens = total_tokens(&messages);
        Ok(Some(SessionContext {
            session,
            messages,
            total_tokens,
        }))
    }

    /// Resumes or starts a session.
    ///
    /// An explicit `session_id` that does not exist is an error; nothing is
    /// created in its place. With `continue_current`, a stale pointer falls
    /// back to creating a new session.
    pub async fn get_or_create_session(&self, options: GetOrCreateOptions) -> SessionResult<Session> {
        if let Some(id) = options.session_id {
            let session = self
                .store
                .get_session(&id)
                .await?
                .ok_or(SessionError::NotFound { id })?;
            self.set_current(&session.id).await;
            return Ok(session);
        }

        if options.continue_current
            && let Some(session) = self.current_session().await?
        {
            tracing::debug!(session_id = %session.id, "Continuing current session");
            return Ok(session);
        }

        self.create_session(options.create).await
    }

    /// Makes `id` the current session.
    pub async fn switch_session(&self, id: &str) -> SessionResult<Session> {
        let session = self
            .store
            .get_session(id)
            .await?
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
        if let Some(pointer) = &self.pointer {
            pointer.write(&session.id).await.storage_err_ctx("write session pointer")?;
        }
        Ok(session)
    }

    pub async fn current_session_id(&self) -> SessionResult<Option<String>> {
        match &self.pointer {
            Some(pointer) => pointer.read().await.storage_err_ctx("read session pointer"),
            None => Ok(None),
        }
    }

    /// The session named by the pointer, if it still exists.
    pub async fn current_session(&self) -> SessionResult<Option<Session>> {
        match self.current_session_id().await? {
            Some(id) => self.store.get_session(&id).await,
            None => Ok(None),
        }
    }

    pub async fn clear_current_session(&self) -> SessionResult<()> {
        if let Some(pointer) = &self.pointer {
            pointer.clear().await.storage_err_ctx("clear session pointer")?;
        }
        Ok(())
    }

    async fn set_current(&self, id: &str) {
        if let Some(pointer) = &self.pointer
            && let Err(e) = pointer.write(id).await
        {
            tracing::warn!(session_id = %id, error = %e, "Failed to update current session pointer");
        }
    }

    pub async fn rename_session(&self, id: &str, name: impl Into<String>) -> SessionResult<Session> {
        let mut session = self.require(id).await?;
        session.name = name.into();
        self.save_details(&mut session).await
    }

    /// Merges `metadata` into the session's map; `null` values remove keys.
    pub async fn update_session_metadata(&self, id: &str, metadata: Metadata) -> SessionResult<Session> {
        let mut session = self.require(id).await?;
        for (key, value) in metadata {
            if value.is_null() {
                session.metadata.remove(&key);
            } else {
                session.metadata.insert(key, value);
            }
        }
        self.save_details(&mut session).await
    }

    async fn require(&self, id: &str) -> SessionResult<Session> {
        self.store
            .get_session(id)
            .await?
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })
    }

    async fn save_details(&self, session: &mut Session) -> SessionResult<Session> {
        session.updated_at = self.now();
        let _lock = self.write_lock().await?;
        let found = self
            .store
            .update_session_details(&session.id, &session.name, &session.metadata, session.updated_at)
            .await?;
        if !found {
            return Err(SessionError::NotFound {
                id: session.id.clone(),
            });
        }
        Ok(session.clone())
    }

    /// Removes sessions idle for more than `max_age_days`, then the oldest
    /// beyond `max_sessions`. Returns the total removed by both passes.
    pub async fn cleanup_old_sessions(&self, max_age_days: u32, max_sessions: usize) -> SessionResult<u64> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(max_age_days));

        let _lock = self.write_lock().await?;
        let expired = self.store.delete_updated_before(cutoff).await?;
        let excess = self.store.delete_beyond(max_sessions).await?;

        if expired + excess > 0 {
            tracing::info!(expired, excess, max_age_days, max_sessions, "Cleaned up sessions");
        }
        Ok(expired + excess)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;
    use tempfile::tempdir;

    async fn manager() -> SessionManager {
        SessionManager::in_memory().await.unwrap()
    }

    fn opts(dir: &Path) -> CreateSessionOptions {
        CreateSessionOptions::default().in_directory(dir)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let dir = tempdir().unwrap();
        let sm = manager().await;
        let session = sm
            .create_session(CreateSessionOptions::named("refactor").in_directory(dir.path()))
            .await
            .unwrap();

        assert_eq!(session.name, "refactor");
        assert_eq!(session.message_count, 0);
        assert_eq!(sm.get_session(&session.id).await.unwrap(), Some(session));
        assert_eq!(sm.get_session("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_add_message_counts_tokens() {
        let dir = tempdir().unwrap();
        let sm = manager().await;
        let session = sm.create_session(opts(dir.path())).await.unwrap();

        let message = sm
            .add_message(&session.id, NewMessage::tool("call-1", "12345678"))
            .await
            .unwrap();
        assert_eq!(message.token_count, 2);
        assert_eq!(message.role, Role::Tool);

        let updated = sm.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(updated.message_count, 1);
        assert!(updated.updated_at > session.updated_at);
    }

    #[tokio::test]
    async fn test_add_message_to_unknown_session() {
        let sm = manager().await;
        let err = sm
            .add_message("ghost", NewMessage::user("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_read_paths_degrade() {
        let sm = manager().await;
        assert!(sm
            .get_messages("ghost", MessageQuery::default())
            .await
            .unwrap()
            .is_empty());
        assert!(sm.get_session_context("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_or_create_explicit_id_fails_fast() {
        let sm = manager().await;
        let err = sm
            .get_or_create_session(GetOrCreateOptions {
                session_id: Some("missing".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotFound { ref id } if id == "missing"));
        assert!(sm.list_sessions(ListOptions::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pointer_continuation() {
        let dir = tempdir().unwrap();
        let sm = SessionManager::open(dir.path()).await.unwrap();
        let first = sm.create_session(opts(dir.path())).await.unwrap();

        let resumed = sm
            .get_or_create_session(GetOrCreateOptions {
                continue_current: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(resumed.id, first.id);

        sm.delete_session(&first.id).await.unwrap();
        assert_eq!(sm.current_session_id().await.unwrap(), None);

        let fresh = sm
            .get_or_create_session(GetOrCreateOptions {
                continue_current: true,
                create: opts(dir.path()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_ne!(fresh.id, first.id);
        assert_eq!(sm.current_session_id().await.unwrap(), Some(fresh.id));
    }

    #[tokio::test]
    async fn test_rename_and_metadata() {
        let dir = tempdir().unwrap();
        let sm = manager().await;
        let session = sm.create_session(opts(dir.path())).await.unwrap();

        let renamed = sm.rename_session(&session.id, "new name").await.unwrap();
        assert_eq!(renamed.name, "new name");

        let mut patch = Metadata::new();
        patch.insert("model".into(), serde_json::json!("m1"));
        sm.update_session_metadata(&session.id, patch).await.unwrap();

        let mut removal = Metadata::new();
        removal.insert("model".into(), serde_json::Value::Null);
        removal.insert("tag".into(), serde_json::json!(["a"]));
        let updated = sm.update_session_metadata(&session.id, removal).await.unwrap();
        assert!(!updated.metadata.contains_key("model"));
        assert_eq!(updated.metadata["tag"], serde_json::json!(["a"]));

        assert!(sm.rename_session("ghost", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_cleanup_by_age() {
        let dir = tempdir().unwrap();
        let sm = manager().await;
        let stale = sm.create_session(opts(dir.path())).await.unwrap();
        let fresh = sm.create_session(opts(dir.path())).await.unwrap();
        sm.store()
            .set_updated_at(&stale.id, Utc::now() - ChronoDuration::days(45))
            .await
            .unwrap();

        assert_eq!(sm.cleanup_old_sessions(30, 100).await.unwrap(), 1);
        assert!(sm.get_session(&stale.id).await.unwrap().is_none());
        assert!(sm.get_session(&fresh.id).await.unwrap().is_some());
    }
}
