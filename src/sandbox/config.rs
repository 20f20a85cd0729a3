//! Sandbox configuration and per-call execution options.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const MIN_TIMEOUT: Duration = Duration::from_millis(1);
pub const MAX_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;
pub const DEFAULT_IMAGE: &str = "ubuntu:24.04";

/// Which backend runs execution units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    /// Container runtime when the probe succeeds, subprocess otherwise.
    #[default]
    Auto,
    Container,
    Subprocess,
}

impl std::fmt::Display for SandboxMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Container => write!(f, "container"),
            Self::Subprocess => write!(f, "subprocess"),
        }
    }
}

impl std::str::FromStr for SandboxMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "container" | "docker" => Ok(Self::Container),
            "subprocess" | "process" | "local" => Ok(Self::Subprocess),
            other => Err(format!("unknown sandbox mode '{}'", other)),
        }
    }
}

/// Executor-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxConfig {
    #[serde(default)]
    pub mode: SandboxMode,

    /// Image used by `execute` when the call does not name one.
    #[serde(default = "default_image")]
    pub image: String,

    /// Container runtime CLI (`docker`, `podman`).
    #[serde(default = "default_runtime")]
    pub runtime: String,

    #[serde(default = "default_pids_limit")]
    pub pids_limit: u32,

    #[serde(default)]
    pub cpus: Option<f64>,

    #[serde(skip, default = "default_grace")]
    pub grace_period: Duration,

    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,

    /// Fills options a call leaves unset, for both `execute` and `execute_code`.
    #[serde(skip)]
    pub defaults: ExecutionOptions,
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

fn default_runtime() -> String {
    "docker".to_string()
}

fn default_pids_limit() -> u32 {
    256
}

fn default_grace() -> Duration {
    DEFAULT_GRACE_PERIOD
}

fn default_max_output() -> usize {
    DEFAULT_MAX_OUTPUT_BYTES
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            mode: SandboxMode::Auto,
            image: default_image(),
            runtime: default_runtime(),
            pids_limit: default_pids_limit(),
            cpus: None,
            grace_period: DEFAULT_GRACE_PERIOD,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            defaults: ExecutionOptions::default(),
        }
    }
}

impl SandboxConfig {
    pub fn new(mode: SandboxMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn subprocess() -> Self {
        Self::new(SandboxMode::Subprocess)
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    pub fn with_cpus(mut self, cpus: f64) -> Self {
        self.cpus = Some(cpus);
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_defaults(mut self, defaults: ExecutionOptions) -> Self {
        self.defaults = defaults;
        self
    }
}

/// Per-call execution options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOptions {
    /// Wall-clock limit. Always enforced; `None` means [`DEFAULT_TIMEOUT`].
    pub timeout: Option<Duration>,
    pub memory_limit_bytes: Option<u64>,
    pub workdir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// `None` inherits the executor default; network is off when neither sets it.
    pub network_enabled: Option<bool>,
    /// Container image override; ignored by the subprocess backend.
    pub image: Option<String>,
}

impl ExecutionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout_ms(self, ms: u64) -> Self {
        self.timeout(Duration::from_millis(ms))
    }

    pub fn memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit_bytes = Some(bytes);
        self
    }

    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn network(mut self, enabled: bool) -> Self {
        self.network_enabled = Some(enabled);
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Effective timeout clamped to `[MIN_TIMEOUT, MAX_TIMEOUT]`.
    pub fn effective_timeout(&self) -> Duration {
        self.timeout
            .unwrap_or(DEFAULT_TIMEOUT)
            .clamp(MIN_TIMEOUT, MAX_TIMEOUT)
    }

    /// Fills unset fields from `defaults`.
    pub fn or(mut self, defaults: &ExecutionOptions) -> Self {
        self.timeout = self.timeout.or(defaults.timeout);
        self.memory_limit_bytes = self.memory_limit_bytes.or(defaults.memory_limit_bytes);
        self.workdir = self.workdir.or_else(|| defaults.workdir.clone());
        self.image = self.image.or_else(|| defaults.image.clone());
        for (key, value) in &defaults.env {
            self.env.entry(key.clone()).or_insert_with(|| value.clone());
        }
        self.network_enabled = self.network_enabled.or(defaults.network_enabled);
        self
    }

    pub fn network_allowed(&self) -> bool {
        self.network_enabled.unwrap_or(false)
    }
}
