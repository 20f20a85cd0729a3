//! Container backend driving a docker-compatible runtime CLI.
//!
//! Units run in hardened, uniquely named containers:
//! - All capabilities dropped (`--cap-drop=ALL`)
//! - No new privileges (`--security-opt=no-new-privileges`)
//! - PID, memory and optional CPU limits; swap disabled when memory is capped
//! - Network off (`--network=none`) unless the call enables it
//! - Working directory mounted read-write at `/workspace`
//!
//! Containers are not started with `--rm` so their state can be inspected for
//! OOM kills after exit; they are removed with `rm -f` on every path.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::OnceCell;

use super::backend::{ExecutionBackend, ExecutionRequest};
use super::supervise::{self, Terminate, exit_code_of};
use super::{ExecutionResult, SandboxConfig, SandboxError, SandboxMode, SandboxResult};

const CONTAINER_PREFIX: &str = "agent-sbx-";
const CONTAINER_WORKDIR: &str = "/workspace";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const ADMIN_TIMEOUT: Duration = Duration::from_secs(10);

/// `docker run` uses 125 for errors in the runtime itself.
const RUNTIME_ERROR_EXIT: i32 = 125;

pub struct ContainerBackend {
    runtime: String,
    /// Probe result for `runtime`, taken on first use.
    available: OnceCell<bool>,
    pids_limit: u32,
    cpus: Option<f64>,
    grace: Duration,
    max_output: usize,
}

impl ContainerBackend {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            runtime: config.runtime.clone(),
            available: OnceCell::new(),
            pids_limit: config.pids_limit,
            cpus: config.cpus,
            grace: config.grace_period,
            max_output: config.max_output_bytes,
        }
    }

    /// Builds the `run` invocation with every hardening flag.
    fn build_command(&self, name: &str, request: &ExecutionRequest) -> SandboxResult<Command> {
        validate_image_name(&request.image)?;
        let workspace = std::path::absolute(&request.workdir)?;

        let mut cmd = Command::new(&self.runtime);
        cmd.arg("run")
            .arg(format!("--name={}", name))
            .arg("--cap-drop=ALL")
            .arg("--security-opt=no-new-privileges")
            .arg(format!("--pids-limit={}", self.pids_limit));

        if let Some(bytes) = request.memory_limit_bytes {
            cmd.arg(format!("--memory={}b", bytes))
                .arg(format!("--memory-swap={}b", bytes));
        }
        if let Some(cpus) = self.cpus {
            cmd.arg(format!("--cpus={}", cpus));
        }
        if !request.network_enabled {
            cmd.arg("--network=none");
        }

        cmd.arg("-v")
            .arg(format!("{}:{}", workspace.display(), CONTAINER_WORKDIR))
            .arg("-w")
            .arg(CONTAINER_WORKDIR);

        let mut env: Vec<_> = request.env.iter().collect();
        env.sort();
        for (key, value) in env {
            cmd.arg("-e").arg(format!("{}={}", key, value));
        }

        cmd.arg(&request.image)
            .arg(&request.program)
            .args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        Ok(cmd)
    }

    /// Reads `(oom_killed, exit_code)` from the stopped container.
    async fn inspect(&self, name: &str) -> Option<(bool, i32)> {
        let output = admin(
            &self.runtime,
            &[
                "inspect",
                "--format",
                "{{.State.OOMKilled}} {{.State.ExitCode}}",
                name,
            ],
        )
        .await?;
        if !output.status.success() {
            return None;
        }
        parse_inspect(&String::from_utf8_lossy(&output.stdout))
    }

    async fn remove(&self, name: &str) {
        if admin(&self.runtime, &["rm", "-f", name]).await.is_none() {
            tracing::warn!(container = %name, "failed to remove container");
        }
    }
}

fn parse_inspect(text: &str) -> Option<(bool, i32)> {
    let mut parts = text.split_whitespace();
    let oom = parts.next()?.parse::<bool>().ok()?;
    let code = parts.next()?.parse::<i32>().ok()?;
    Some((oom, code))
}

/// Runs a short runtime command, bounded by [`ADMIN_TIMEOUT`].
async fn admin(runtime: &str, args: &[&str]) -> Option<std::process::Output> {
    let fut = Command::new(runtime)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();
    match tokio::time::timeout(ADMIN_TIMEOUT, fut).await {
        Ok(Ok(output)) => Some(output),
        Ok(Err(e)) => {
            tracing::debug!(runtime, ?args, error = %e, "runtime command failed");
            None
        }
        Err(_) => {
            tracing::debug!(runtime, ?args, "runtime command timed out");
            None
        }
    }
}

/// Checks that the runtime CLI exists and its daemon answers.
pub async fn probe_runtime(runtime: &str) -> bool {
    let fut = Command::new(runtime)
        .arg("info")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();
    match tokio::time::timeout(PROBE_TIMEOUT, fut).await {
        Ok(Ok(status)) => status.success(),
        _ => false,
    }
}

/// Validates an image reference before it reaches the command line.
pub fn validate_image_name(image: &str) -> SandboxResult<()> {
    if image.is_empty() || image.len() > 256 {
        return Err(SandboxError::InvalidConfig(format!(
            "image name must be 1-256 characters, got {}",
            image.len()
        )));
    }
    if let Some(ch) = image
        .chars()
        .find(|ch| !(ch.is_ascii_alphanumeric() || "-.:/_@".contains(*ch)))
    {
        return Err(SandboxError::InvalidConfig(format!(
            "image name contains invalid character {:?}",
            ch
        )));
    }
    if image.starts_with(['-', '.', ':']) {
        return Err(SandboxError::InvalidConfig(
            "image name cannot start with '-', '.' or ':'".into(),
        ));
    }
    Ok(())
}

#[async_trait]
impl ExecutionBackend for ContainerBackend {
    fn name(&self) -> &'static str {
        "container"
    }

    fn mode(&self) -> SandboxMode {
        SandboxMode::Container
    }

    async fn is_available(&self) -> bool {
        *self
            .available
            .get_or_init(|| async {
                let available = probe_runtime(&self.runtime).await;
                tracing::info!(runtime = %self.runtime, available, "probed container runtime");
                available
            })
            .await
    }

    async fn run(&self, request: ExecutionRequest) -> ExecutionResult {
        let name = format!("{}{}", CONTAINER_PREFIX, uuid::Uuid::new_v4().simple());

        let mut cmd = match self.build_command(&name, &request) {
            Ok(cmd) => cmd,
            Err(e) => return ExecutionResult::setup_failure(e.to_string()),
        };
        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(runtime = %self.runtime, error = %e, "failed to start container runtime");
                return ExecutionResult::setup_failure(format!(
                    "failed to start '{}': {}",
                    self.runtime, e
                ));
            }
        };

        tracing::debug!(
            container = %name,
            image = %request.image,
            program = %request.program,
            "container started"
        );

        let handle = ContainerHandle {
            runtime: self.runtime.clone(),
            name: name.clone(),
        };
        let outcome = supervise::supervise(
            child,
            request.timeout,
            self.grace,
            self.max_output,
            &handle,
        )
        .await;

        let run_code = exit_code_of(outcome.status);
        let inspected = self.inspect(&name).await;
        self.remove(&name).await;

        if run_code == RUNTIME_ERROR_EXIT && inspected.is_none_or(|(_, code)| code == 0) {
            tracing::warn!(container = %name, stderr = %outcome.stderr, "container runtime error");
            return ExecutionResult::setup_failure(outcome.stderr);
        }

        let (oom_killed, exit_code) = match inspected {
            Some((oom, code)) if code != 0 || !outcome.timed_out => (oom, code),
            Some((oom, _)) => (oom, run_code),
            None => (false, run_code),
        };
        if oom_killed {
            tracing::warn!(container = %name, exit_code, "container was OOM killed");
        }

        ExecutionResult {
            exit_code,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            timed_out: outcome.timed_out,
            oom_killed,
        }
    }
}

/// Stops a container by name; the local client process is killed with it.
struct ContainerHandle {
    runtime: String,
    name: String,
}

#[async_trait]
impl Terminate for ContainerHandle {
    async fn graceful(&self, _child: &mut Child) {
        let _ = admin(&self.runtime, &["kill", "--signal=SIGTERM", &self.name]).await;
    }

    async fn force(&self, child: &mut Child) {
        let _ = admin(&self.runtime, &["kill", &self.name]).await;
        let _ = child.start_kill();
    }
}
