//! Plain child-process backend with best-effort limits.
//!
//! The child leads its own process group so timeouts can signal every
//! descendant. Memory, CPU, file-size and descriptor caps are applied with
//! `setrlimit` before `exec`; network isolation is limited to pointing proxy
//! variables at an unreachable address.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use super::backend::{ExecutionBackend, ExecutionRequest};
use super::supervise::{self, Terminate, exit_code_of, signal_of};
use super::{ExecutionResult, SandboxConfig, SandboxMode};
use crate::security::{ResourceLimits, SanitizedEnv};

/// Allocation-failure diagnostics from common runtimes.
const OOM_MARKERS: &[&str] = &[
    "MemoryError",
    "out of memory",
    "Out of memory",
    "Cannot allocate memory",
    "JavaScript heap out of memory",
    "failed to allocate",
    "memory allocation of",
];

#[cfg(unix)]
const SIGKILL: i32 = 9;

pub struct SubprocessBackend {
    grace: Duration,
    max_output: usize,
}

impl SubprocessBackend {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            grace: config.grace_period,
            max_output: config.max_output_bytes,
        }
    }

    fn command(&self, request: &ExecutionRequest) -> Command {
        let mut env = SanitizedEnv::from_current()
            .with_vars(&request.env)
            .with_working_dir(&request.workdir);
        if !request.network_enabled {
            env = env.without_network();
        }

        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .current_dir(&request.workdir)
            .env_clear()
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            cmd.process_group(0);
            let limits = ResourceLimits::for_execution(
                request.memory_limit_bytes,
                request.timeout.as_secs().max(1),
            );
            // SAFETY: the closure only calls setrlimit, which is
            // async-signal-safe, and allocates nothing on success.
            unsafe {
                cmd.pre_exec(move || limits.apply_raw());
            }
        }

        cmd
    }
}

/// Whether the process looks like it died from memory exhaustion. Only runs
/// with a memory limit qualify, and a SIGKILL the executor sent never does.
fn detect_oom(
    signal: Option<i32>,
    killed_by_us: bool,
    memory_limited: bool,
    stderr: &str,
) -> bool {
    if !memory_limited {
        return false;
    }
    #[cfg(unix)]
    {
        if signal == Some(SIGKILL) && !killed_by_us {
            return true;
        }
    }
    #[cfg(not(unix))]
    let _ = (signal, killed_by_us);

    OOM_MARKERS.iter().any(|marker| stderr.contains(marker))
}

#[async_trait]
impl ExecutionBackend for SubprocessBackend {
    fn name(&self) -> &'static str {
        "subprocess"
    }

    fn mode(&self) -> SandboxMode {
        SandboxMode::Subprocess
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn run(&self, request: ExecutionRequest) -> ExecutionResult {
        let child = match self.command(&request).spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(program = %request.program, error = %e, "failed to spawn subprocess");
                return ExecutionResult::setup_failure(format!(
                    "failed to start '{}': {}",
                    request.program, e
                ));
            }
        };

        tracing::debug!(
            program = %request.program,
            pid = child.id(),
            timeout_ms = request.timeout.as_millis() as u64,
            "subprocess started"
        );

        let group = ProcessGroup::of(&child);
        let outcome = supervise::supervise(
            child,
            request.timeout,
            self.grace,
            self.max_output,
            &group,
        )
        .await;

        let signal = signal_of(outcome.status);
        let killed_by_us = outcome.timed_out || outcome.force_killed;
        let oom_killed = detect_oom(
            signal,
            killed_by_us,
            request.memory_limit_bytes.is_some(),
            &outcome.stderr,
        );
        if oom_killed {
            tracing::warn!(program = %request.program, "subprocess appears to have run out of memory");
        }

        ExecutionResult {
            exit_code: exit_code_of(outcome.status),
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            timed_out: outcome.timed_out,
            oom_killed,
        }
    }
}

/// Signals the whole process group led by the child. The group id is
/// captured at spawn because the child's pid is gone once it is reaped.
struct ProcessGroup {
    pgid: Option<i32>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self {
            pgid: child.id().and_then(|pid| i32::try_from(pid).ok()),
        }
    }

    #[cfg(unix)]
    fn signal(&self, signal: nix::sys::signal::Signal) {
        let Some(pgid) = self.pgid else {
            return;
        };
        if let Err(e) = nix::sys::signal::killpg(nix::unistd::Pid::from_raw(pgid), signal) {
            tracing::debug!(pgid, %signal, error = %e, "killpg failed");
        }
    }
}

#[async_trait]
impl Terminate for ProcessGroup {
    async fn graceful(&self, child: &mut Child) {
        #[cfg(unix)]
        {
            let _ = child;
            self.signal(nix::sys::signal::Signal::SIGTERM);
        }
        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }
    }

    async fn force(&self, child: &mut Child) {
        #[cfg(unix)]
        {
            self.signal(nix::sys::signal::Signal::SIGKILL);
        }
        let _ = child.start_kill();
    }

    async fn cleanup(&self, _child: &mut Child) {
        // Background jobs left in the group would hold the pipes open.
        #[cfg(unix)]
        {
            if let Some(pgid) = self.pgid {
                let _ = nix::sys::signal::killpg(
                    nix::unistd::Pid::from_raw(pgid),
                    nix::sys::signal::Signal::SIGKILL,
                );
            }
        }
    }
}
