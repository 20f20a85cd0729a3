use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::Instrument;

use super::backend::{ExecutionBackend, ExecutionRequest};
use super::container::ContainerBackend;
use super::language::Interpreter;
use super::subprocess::SubprocessBackend;
use super::{ExecutionOptions, ExecutionResult, SandboxConfig, SandboxMode, SandboxResult};
use crate::observability::ExecutionSpan;

/// Runs commands and code snippets in the configured isolation backend.
///
/// The backend is chosen on first use and kept for the executor's lifetime.
/// In [`SandboxMode::Auto`] the container runtime is probed once; if the probe
/// fails every call runs as a subprocess.
pub struct SandboxExecutor {
    config: SandboxConfig,
    backend: OnceCell<Arc<dyn ExecutionBackend>>,
}

impl SandboxExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            backend: OnceCell::new(),
        }
    }

    /// Uses `backend` for every call, bypassing mode selection.
    pub fn with_backend(config: SandboxConfig, backend: Arc<dyn ExecutionBackend>) -> Self {
        Self {
            config,
            backend: OnceCell::new_with(Some(backend)),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    async fn backend(&self) -> &Arc<dyn ExecutionBackend> {
        self.backend
            .get_or_init(|| async { self.select_backend().await })
            .await
    }

    async fn select_backend(&self) -> Arc<dyn ExecutionBackend> {
        let subprocess = || Arc::new(SubprocessBackend::new(&self.config)) as Arc<dyn ExecutionBackend>;
        match self.config.mode {
            SandboxMode::Subprocess => subprocess(),
            SandboxMode::Container => Arc::new(ContainerBackend::new(&self.config)),
            SandboxMode::Auto => {
                let container = ContainerBackend::new(&self.config);
                if container.is_available().await {
                    Arc::new(container)
                } else {
                    tracing::warn!(
                        runtime = %self.config.runtime,
                        "container runtime unavailable, falling back to subprocess execution"
                    );
                    subprocess()
                }
            }
        }
    }

    /// Isolation of the backend actually in use, never `Auto`.
    pub async fn mode(&self) -> SandboxMode {
        self.backend().await.mode()
    }

    /// Runs `command` with `args`. Never fails: infrastructure problems come
    /// back as a result with exit code `-1`.
    pub async fn execute<I>(&self, command: &str, args: I, options: ExecutionOptions) -> ExecutionResult
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args = args.into_iter().map(|a| a.as_ref().to_string()).collect();
        let options = options.or(&self.config.defaults);
        let request = ExecutionRequest::new(command, args, options, &self.config);
        self.run(request).await
    }

    /// Runs `code` with the interpreter for `language`, using executor defaults.
    pub async fn execute_code(&self, code: &str, language: &str) -> SandboxResult<ExecutionResult> {
        self.execute_code_with(code, language, ExecutionOptions::default())
            .await
    }

    /// Fails fast with `UnsupportedLanguage` before any unit is created.
    pub async fn execute_code_with(
        &self,
        code: &str,
        language: &str,
        options: ExecutionOptions,
    ) -> SandboxResult<ExecutionResult> {
        let interpreter = Interpreter::for_language(language)?;
        let mut options = options.or(&self.config.defaults);
        if options.image.is_none() {
            options.image = Some(interpreter.image.to_string());
        }
        let request = ExecutionRequest::new(
            interpreter.program,
            interpreter.args(code),
            options,
            &self.config,
        );
        Ok(self.run(request).await)
    }

    async fn run(&self, request: ExecutionRequest) -> ExecutionResult {
        let backend = self.backend().await;
        tracing::debug!(
            backend = backend.name(),
            program = %request.program,
            timeout_ms = request.timeout.as_millis() as u64,
            "executing"
        );
        let span = ExecutionSpan::new(backend.name(), &request.program);
        let result = backend.run(request).instrument(span.span().clone()).await;
        span.finish(&result);
        if result.timed_out {
            tracing::info!(backend = backend.name(), "execution timed out");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records requests and returns a canned result.
    #[derive(Default)]
    struct RecordingBackend {
        seen: Mutex<Vec<ExecutionRequest>>,
        isolates: bool,
    }

    #[async_trait]
    impl ExecutionBackend for RecordingBackend {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn mode(&self) -> SandboxMode {
            if self.isolates {
                SandboxMode::Container
            } else {
                SandboxMode::Subprocess
            }
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn run(&self, request: ExecutionRequest) -> ExecutionResult {
            self.seen.lock().unwrap().push(request);
            ExecutionResult::default()
        }
    }

    #[tokio::test]
    async fn test_subprocess_mode_reported() {
        let executor = SandboxExecutor::new(SandboxConfig::subprocess());
        assert_eq!(executor.mode().await, SandboxMode::Subprocess);
    }

    #[tokio::test]
    async fn test_custom_backend_reports_its_own_mode() {
        let backend = Arc::new(RecordingBackend {
            isolates: true,
            ..Default::default()
        });
        let executor = SandboxExecutor::with_backend(SandboxConfig::subprocess(), backend);
        assert_eq!(executor.mode().await, SandboxMode::Container);
    }

    #[tokio::test]
    async fn test_call_overrides_network_default() {
        let backend = Arc::new(RecordingBackend::default());
        let config =
            SandboxConfig::default().with_defaults(ExecutionOptions::new().network(true));
        let executor = SandboxExecutor::with_backend(config, backend.clone());

        executor.execute("ls", ["-la"], ExecutionOptions::new()).await;
        executor
            .execute("ls", ["-la"], ExecutionOptions::new().network(false))
            .await;
        executor.execute_code("print(1)", "python").await.unwrap();

        let seen = backend.seen.lock().unwrap();
        assert!(seen[0].network_enabled);
        assert!(!seen[1].network_enabled);
        assert!(seen[2].network_enabled);
    }

    #[tokio::test]
    async fn test_execute_code_builds_interpreter_call() {
        let backend = Arc::new(RecordingBackend::default());
        let executor = SandboxExecutor::with_backend(SandboxConfig::default(), backend.clone());

        executor.execute_code("print('hi')", "python").await.unwrap();

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].program, "python3");
        assert_eq!(seen[0].args, vec!["-c", "print('hi')"]);
        assert_eq!(seen[0].image, "python:3.12-slim");
    }

    #[tokio::test]
    async fn test_unsupported_language_creates_nothing() {
        let backend = Arc::new(RecordingBackend::default());
        let executor = SandboxExecutor::with_backend(SandboxConfig::default(), backend.clone());

        let err = executor.execute_code("x", "cobol").await.unwrap_err();
        assert!(matches!(err, crate::sandbox::SandboxError::UnsupportedLanguage(_)));
        assert!(backend.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_config_defaults_applied() {
        let backend = Arc::new(RecordingBackend::default());
        let config = SandboxConfig::default()
            .with_defaults(ExecutionOptions::new().timeout_ms(2500).memory_limit(1 << 20));
        let executor = SandboxExecutor::with_backend(config, backend.clone());

        executor
            .execute("ls", ["-la"], ExecutionOptions::new())
            .await;

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].timeout, std::time::Duration::from_millis(2500));
        assert_eq!(seen[0].memory_limit_bytes, Some(1 << 20));
        assert_eq!(seen[0].image, crate::sandbox::DEFAULT_IMAGE);
    }
}
