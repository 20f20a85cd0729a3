//! Security error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("resource limit error: {0}")]
    ResourceLimit(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
