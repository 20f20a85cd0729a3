//! # coding-agent-core
//!
//! Safety and state infrastructure for an AI coding agent: sandboxed command
//! and code execution, permission gating for file and shell access, durable
//! conversation sessions, and rollback checkpoints of the working directory.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use coding_agent_core::prelude::*;
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> coding_agent_core::Result<()> {
//!     let config = ConfigManager::discover(".")?;
//!     let settings = config.settings().await?;
//!
//!     let permissions = PermissionManager::from_store(&PolicyStore::discover(Path::new(".")).await?, ".");
//!     permissions
//!         .can_execute_command("cargo test")
//!         .into_result(EXECUTE_COMMAND_TOOL)?;
//!
//!     let sandbox = SandboxExecutor::new(settings.sandbox_config());
//!     let result = sandbox
//!         .execute("cargo", ["test"], ExecutionOptions::new())
//!         .await;
//!     println!("exit {}", result.exit_code);
//!
//!     let checkpoints = CheckpointManager::new(".");
//!     checkpoints.create_checkpoint("after tests").await?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod checkpoint;
pub mod common;
pub mod config;
pub mod observability;
pub mod permissions;
pub mod prelude;
pub mod sandbox;
pub mod security;
pub mod session;

pub use checkpoint::{Checkpoint, CheckpointError, CheckpointManager, Operation, OperationKind};
pub use config::{ConfigError, ConfigManager, ConfigSource, Settings};
pub use permissions::{
    Capability, GlobalPermissions, PermissionDecision, PermissionError, PermissionManager,
    PermissionRule, PolicyStore,
};
pub use sandbox::{
    ExecutionError, ExecutionOptions, ExecutionResult, SandboxConfig, SandboxError,
    SandboxExecutor, SandboxMode,
};
pub use security::SecurityError;
pub use session::{Message, Role, Session, SessionError, SessionManager};

/// Error type for coding-agent-core operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Policy denials and approvals still pending
    Authorization,
    /// Bad configuration, unknown languages, malformed policy
    Configuration,
    /// Lookups by id or prefix that matched nothing usable
    NotFound,
    /// Storage, IO, version-control or runtime failures
    Internal,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Permission(
                PermissionError::DeniedByPolicy { .. } | PermissionError::ApprovalRequired { .. },
            ) => ErrorCategory::Authorization,

            Error::Permission(_)
            | Error::Config(_)
            | Error::Sandbox(SandboxError::UnsupportedLanguage(_) | SandboxError::InvalidConfig(_)) => {
                ErrorCategory::Configuration
            }

            Error::Session(SessionError::NotFound { .. })
            | Error::Checkpoint(
                CheckpointError::NotFound { .. } | CheckpointError::AmbiguousPrefix { .. },
            ) => ErrorCategory::NotFound,

            Error::Sandbox(_)
            | Error::Security(_)
            | Error::Session(_)
            | Error::Checkpoint(_)
            | Error::Io(_)
            | Error::Json(_) => ErrorCategory::Internal,
        }
    }

    pub fn is_authorization_error(&self) -> bool {
        self.category() == ErrorCategory::Authorization
    }

    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }
}

/// Result type alias for coding-agent-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let denied: Error = PermissionError::DeniedByPolicy {
            reason: "matched deny".into(),
        }
        .into();
        assert!(denied.is_authorization_error());

        let missing: Error = SessionError::NotFound { id: "x".into() }.into();
        assert!(missing.is_not_found());

        let ambiguous: Error = CheckpointError::AmbiguousPrefix {
            prefix: "a".into(),
            matches: 2,
        }
        .into();
        assert_eq!(ambiguous.category(), ErrorCategory::NotFound);

        let language: Error = SandboxError::UnsupportedLanguage("cobol".into()).into();
        assert_eq!(language.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn test_error_display_is_transparent() {
        let err: Error = ConfigError::UnknownKey { key: "k".into() }.into();
        assert_eq!(err.to_string(), "Unknown configuration key: k");
    }
}
