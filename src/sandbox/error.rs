//! Sandbox error types.
//!
//! Execution failures are reported inside [`ExecutionResult`](super::ExecutionResult);
//! `SandboxError` covers requests that are rejected before any unit is created.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("unsupported language '{0}' (supported: {supported})", supported = super::language::SUPPORTED.join(", "))]
    UnsupportedLanguage(String),

    #[error("sandbox backend not available: {0}")]
    NotAvailable(String),

    #[error("invalid sandbox configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type SandboxResult<T> = Result<T, SandboxError>;

/// Failure classes an [`ExecutionResult`](super::ExecutionResult) can encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionError {
    /// The backend could not create or start the unit.
    ContainerUnavailable,
    Timeout,
    OomKilled,
    NonZeroExit(i32),
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContainerUnavailable => write!(f, "execution backend unavailable"),
            Self::Timeout => write!(f, "execution timed out"),
            Self::OomKilled => write!(f, "killed for exceeding its memory limit"),
            Self::NonZeroExit(code) => write!(f, "exited with status {}", code),
        }
    }
}
