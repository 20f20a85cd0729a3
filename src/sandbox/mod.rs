//! Isolated execution of agent-proposed commands and code.
//!
//! Two backends implement [`ExecutionBackend`]:
//! - container: a docker-compatible runtime with kernel-enforced limits
//! - subprocess: a child process group with `setrlimit` caps
//!
//! [`SandboxExecutor`] picks one per process and always answers with an
//! [`ExecutionResult`], even when the backend itself fails.

mod backend;
mod config;
mod container;
mod error;
mod executor;
mod language;
mod result;
mod subprocess;
mod supervise;

pub use backend::{ExecutionBackend, ExecutionRequest};
pub use config::{
    DEFAULT_GRACE_PERIOD, DEFAULT_IMAGE, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_TIMEOUT,
    ExecutionOptions, MAX_TIMEOUT, MIN_TIMEOUT, SandboxConfig, SandboxMode,
};
pub use container::{ContainerBackend, probe_runtime, validate_image_name};
pub use error::{ExecutionError, SandboxError, SandboxResult};
pub use executor::SandboxExecutor;
pub use language::Interpreter;
pub use result::{ExecutionResult, SETUP_FAILURE_EXIT_CODE};
pub use subprocess::SubprocessBackend;
