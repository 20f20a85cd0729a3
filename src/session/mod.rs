//! Durable multi-turn conversation state.
//!
//! Sessions and messages live in one SQLite file. [`SessionManager`] owns the
//! lifecycle, token-bounded history windows, retention and the marker file
//! recording which session an invocation continues by default.

mod manager;
mod pointer;
mod store;
mod tokens;
mod types;

pub use manager::{DATABASE_FILE, POINTER_FILE, SessionManager};
pub use pointer::{CurrentSessionPointer, detect_git_branch};
pub use store::SessionStore;
pub use tokens::{count_tokens, select_window, total_tokens};
pub use types::{
    CreateSessionOptions, GetOrCreateOptions, ListOptions, Message, MessageQuery, Metadata,
    NewMessage, Role, Session, SessionContext,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found: {id}")]
    NotFound { id: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

pub(crate) trait StorageResultExt<T> {
    fn storage_err(self) -> SessionResult<T>;
    fn storage_err_ctx(self, context: &str) -> SessionResult<T>;
}

impl<T, E: std::fmt::Display> StorageResultExt<T> for std::result::Result<T, E> {
    fn storage_err(self) -> SessionResult<T> {
        self.map_err(|e| SessionError::Storage {
            message: e.to_string(),
        })
    }

    fn storage_err_ctx(self, context: &str) -> SessionResult<T> {
        self.map_err(|e| SessionError::Storage {
            message: format!("{}: {}", context, e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_display() {
        let err = SessionError::NotFound {
            id: "test-123".to_string(),
        };
        assert!(err.to_string().contains("test-123"));
    }

    #[test]
    fn test_storage_err_ctx() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::other("disk full"));
        let err = result.storage_err_ctx("insert").unwrap_err();
        assert_eq!(err.to_string(), "Storage error: insert: disk full");
    }
}
