//! Shared lifecycle for a spawned execution unit: output pumps, the timeout
//! race, graceful-then-forced termination and reaping.

use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::task::JoinHandle;

const TRUNCATION_MARKER: &str = "\n... (output truncated)";

/// Byte buffer that stops growing at a cap and remembers it overflowed.
#[derive(Debug, Clone)]
pub struct CappedBuffer {
    inner: Arc<Mutex<BufferState>>,
}

#[derive(Debug, Default)]
struct BufferState {
    bytes: Vec<u8>,
    cap: usize,
    truncated: bool,
}

impl CappedBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BufferState {
                cap,
                ..Default::default()
            })),
        }
    }

    pub fn push(&self, chunk: &[u8]) {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let room = state.cap.saturating_sub(state.bytes.len());
        if chunk.len() > room {
            state.truncated = true;
        }
        let take = chunk.len().min(room);
        state.bytes.extend_from_slice(&chunk[..take]);
    }

    pub fn is_truncated(&self) -> bool {
        self.inner.lock().map(|s| s.truncated).unwrap_or(false)
    }

    /// Lossy UTF-8 snapshot, with a marker appended when output was dropped.
    pub fn to_string_lossy(&self) -> String {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut text = String::from_utf8_lossy(&state.bytes).into_owned();
        if state.truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }
}

/// Copies a stream into `buffer` until EOF. Reading continues past the cap
/// so the writer never blocks on a full pipe.
pub fn spawn_pump<R>(mut reader: R, buffer: CappedBuffer) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => buffer.push(&chunk[..n]),
                Err(e) => {
                    tracing::debug!(error = %e, "output pump stopped");
                    break;
                }
            }
        }
    })
}

/// Backend-specific way to stop a running unit.
#[async_trait]
pub trait Terminate: Send + Sync {
    /// Asks the unit to exit (SIGTERM, `docker stop`).
    async fn graceful(&self, child: &mut Child);

    /// Kills the unit outright.
    async fn force(&self, child: &mut Child);

    /// Runs after the unit has been reaped, before output is collected.
    async fn cleanup(&self, _child: &mut Child) {}
}

/// What supervision observed about a finished unit.
#[derive(Debug)]
pub struct Supervised {
    pub status: Option<ExitStatus>,
    pub timed_out: bool,
    /// Set when `force` had to be used.
    pub force_killed: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs `child` to completion or until `timeout`, then reaps it.
///
/// On timeout the unit gets `grace` to exit after [`Terminate::graceful`]
/// before [`Terminate::force`]. Output pumps are joined with the same grace
/// bound so a descendant holding a pipe open cannot stall the call.
pub async fn supervise(
    mut child: Child,
    timeout: Duration,
    grace: Duration,
    max_output: usize,
    terminator: &dyn Terminate,
) -> Supervised {
    let stdout_buf = CappedBuffer::new(max_output);
    let stderr_buf = CappedBuffer::new(max_output);
    let pumps: Vec<JoinHandle<()>> = [
        child
            .stdout
            .take()
            .map(|r| spawn_pump(r, stdout_buf.clone())),
        child
            .stderr
            .take()
            .map(|r| spawn_pump(r, stderr_buf.clone())),
    ]
    .into_iter()
    .flatten()
    .collect();

    let mut timed_out = false;
    let mut force_killed = false;

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "failed to wait for execution unit");
            terminator.force(&mut child).await;
            force_killed = true;
            child.wait().await.ok()
        }
        Err(_) => {
            timed_out = true;
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "execution timed out");
            terminator.graceful(&mut child).await;
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => Some(status),
                _ => {
                    terminator.force(&mut child).await;
                    force_killed = true;
                    // Reap so nothing is left as a zombie.
                    child.wait().await.ok()
                }
            }
        }
    };

    terminator.cleanup(&mut child).await;

    for mut pump in pumps {
        if tokio::time::timeout(grace, &mut pump).await.is_err() {
            pump.abort();
        }
    }

    Supervised {
        status,
        timed_out,
        force_killed,
        stdout: stdout_buf.to_string_lossy(),
        stderr: stderr_buf.to_string_lossy(),
    }
}

/// Exit code for a status; signal deaths map to `128 + signal`.
pub fn exit_code_of(status: Option<ExitStatus>) -> i32 {
    let Some(status) = status else {
        return -1;
    };
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Signal that ended the process, if any.
pub fn signal_of(status: Option<ExitStatus>) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.and_then(|s| s.signal())
    }
    #[cfg(not(unix))]
    {
        let _ = status;
        None
    }
}
