//! Working-directory snapshots and an undoable log of file mutations.
//!
//! Checkpoints are commits in a private git store under
//! `<workdir>/.coding-agent/checkpoints/`, so the user's own repository is
//! never written to. File-mutating tool calls are recorded in a bounded
//! operation log that supports single-step undo.

mod manager;
mod operations;
mod vcs;

pub use manager::{CHECKPOINT_DIR, Checkpoint, CheckpointManager, DEFAULT_MAX_OPERATIONS};
pub use operations::{Operation, OperationKind, UndoData};
pub use vcs::{ChangeKind, CommitInfo, EMPTY_TREE, FileStatus, GitBackend, VersionControlBackend};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint not found: {id}")]
    NotFound { id: String },

    #[error("Checkpoint prefix '{prefix}' is ambiguous ({matches} matches)")]
    AmbiguousPrefix { prefix: String, matches: usize },

    #[error("Failed to restore checkpoint {id}: {message}")]
    RestoreFailed { id: String, message: String },

    #[error("Version control error: {message}")]
    Vcs { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type CheckpointResult<T> = std::result::Result<T, CheckpointError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CheckpointError::AmbiguousPrefix {
            prefix: "ab".into(),
            matches: 3,
        };
        assert_eq!(
            err.to_string(),
            "Checkpoint prefix 'ab' is ambiguous (3 matches)"
        );
    }
}
