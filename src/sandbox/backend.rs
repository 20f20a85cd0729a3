use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use super::{ExecutionOptions, ExecutionResult, SandboxConfig, SandboxMode};

/// Fully resolved unit of work handed to a backend.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub memory_limit_bytes: Option<u64>,
    pub workdir: PathBuf,
    pub env: HashMap<String, String>,
    pub network_enabled: bool,
    pub image: String,
}

impl ExecutionRequest {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        options: ExecutionOptions,
        config: &SandboxConfig,
    ) -> Self {
        let timeout = options.effective_timeout();
        let network_enabled = options.network_allowed();
        let workdir = options
            .workdir
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            program: program.into(),
            args,
            timeout,
            memory_limit_bytes: options.memory_limit_bytes,
            workdir,
            env: options.env,
            network_enabled,
            image: options.image.unwrap_or_else(|| config.image.clone()),
        }
    }
}

/// One isolation strategy. Implementations must always return a result,
/// encoding setup failures with exit code `-1`.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Isolation this backend provides, as reported by [`SandboxExecutor::mode`].
    ///
    /// [`SandboxExecutor::mode`]: super::SandboxExecutor::mode
    fn mode(&self) -> SandboxMode;

    /// Whether the backend can run units on this host.
    async fn is_available(&self) -> bool;

    async fn run(&self, request: ExecutionRequest) -> ExecutionResult;
}
