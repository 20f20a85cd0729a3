//! Environment sanitization for subprocess execution.

use std::collections::HashMap;

const SAFE_ENV_VARS: &[&str] = &[
    "HOME",
    "USER",
    "LOGNAME",
    "SHELL",
    "LANG",
    "LC_ALL",
    "LC_CTYPE",
    "TERM",
    "TZ",
    "TMPDIR",
    "CARGO_HOME",
    "RUSTUP_HOME",
    "VIRTUAL_ENV",
    "GIT_AUTHOR_NAME",
    "GIT_AUTHOR_EMAIL",
    "GIT_COMMITTER_NAME",
    "GIT_COMMITTER_EMAIL",
    "XDG_CACHE_HOME",
    "XDG_CONFIG_HOME",
    "XDG_DATA_HOME",
];

const BLOCKED_ENV_PREFIXES: &[&str] = &[
    // Dynamic linker injection
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "LD_AUDIT",
    "DYLD_",
    // Shell startup injection
    "BASH_ENV",
    "ENV",
    "BASH_FUNC_",
    "PROMPT_COMMAND",
    "IFS",
    // Interpreter startup hooks
    "PYTHONSTARTUP",
    "PYTHONHOME",
    "PERL5OPT",
    "PERL5LIB",
    "RUBYOPT",
    "NODE_OPTIONS",
    "JAVA_TOOL_OPTIONS",
    // Command overrides
    "GIT_SSH",
    "GIT_EXEC_PATH",
    "SSH_ASKPASS",
    "SUDO_ASKPASS",
    "RUSTC_WRAPPER",
    "GLIBC_TUNABLES",
];

const SAFE_PATH: &str = "/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin";

/// Proxy address nothing listens on; used to starve network access best-effort.
const BLACKHOLE_PROXY: &str = "http://127.0.0.1:9";

const PROXY_VARS: &[&str] = &[
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "ALL_PROXY",
    "http_proxy",
    "https_proxy",
    "all_proxy",
];

/// Allow-listed environment with a forced safe `PATH`.
#[derive(Debug, Clone)]
pub struct SanitizedEnv {
    vars: HashMap<String, String>,
}

impl SanitizedEnv {
    pub fn from_current() -> Self {
        Self::from_env(std::env::vars())
    }

    pub fn from_env(env: impl Iterator<Item = (String, String)>) -> Self {
        let vars = env
            .filter(|(key, _)| !Self::is_blocked(key) && Self::is_safe(key))
            .chain(std::iter::once(("PATH".to_string(), SAFE_PATH.to_string())))
            .collect();
        Self { vars }
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        if !Self::is_blocked(&key) {
            self.vars.insert(key, value.into());
        }
        self
    }

    /// Layers caller-supplied variables on top; blocked names are dropped.
    pub fn with_vars<'a>(mut self, vars: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        for (key, value) in vars {
            if Self::is_blocked(key) {
                tracing::debug!(key = %key, "dropping blocked environment variable");
                continue;
            }
            self.vars.insert(key.clone(), value.clone());
        }
        self
    }

    pub fn with_working_dir(mut self, dir: impl AsRef<std::path::Path>) -> Self {
        self.vars
            .insert("PWD".to_string(), dir.as_ref().display().to_string());
        self
    }

    /// Routes proxy-aware clients to an address that refuses connections.
    pub fn without_network(mut self) -> Self {
        for var in PROXY_VARS {
            self.vars.insert((*var).to_string(), BLACKHOLE_PROXY.to_string());
        }
        self.vars.insert("NO_PROXY".to_string(), String::new());
        self.vars.insert("no_proxy".to_string(), String::new());
        self
    }

    pub fn vars(&self) -> &HashMap<String, String> {
        &self.vars
    }

    fn is_blocked(key: &str) -> bool {
        BLOCKED_ENV_PREFIXES
            .iter()
            .any(|prefix| key.starts_with(prefix))
    }

    fn is_safe(key: &str) -> bool {
        SAFE_ENV_VARS.contains(&key)
    }
}

impl Default for SanitizedEnv {
    fn default() -> Self {
        Self::from_current()
    }
}

impl IntoIterator for SanitizedEnv {
    type Item = (String, String);
    type IntoIter = std::collections::hash_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.vars.into_iter()
    }
}
