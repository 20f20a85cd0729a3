//! Typed view of the effective configuration.

use std::time::Duration;

use secrecy::SecretString;
use serde_json::Value;

use super::provider::ConfigMap;
use super::validator::key_spec;
use super::{ConfigError, ConfigResult};
use crate::sandbox::{ExecutionOptions, SandboxConfig, SandboxMode};

#[derive(Debug, Clone)]
pub struct Settings {
    pub model: String,
    pub log_level: String,
    pub sandbox_mode: SandboxMode,
    pub sandbox_image: String,
    pub sandbox_timeout_ms: u64,
    pub sandbox_memory_limit_mb: u64,
    pub sandbox_network_enabled: bool,
    pub context_max_tokens: u64,
    pub session_max_age_days: u32,
    pub session_max_sessions: usize,
    pub checkpoint_max_operations: usize,
    pub api_key: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
}

impl Default for Settings {
    fn default() -> Self {
        // Defaults always satisfy their own key specs.
        Self::from_map(&ConfigMap::new()).unwrap_or_else(|_| Self::fallback())
    }
}

/// Looks up `key`, falling back to its declared default.
fn lookup(values: &ConfigMap, key: &str) -> ConfigResult<Value> {
    let spec = key_spec(key)?;
    match values.get(key) {
        Some(v) if !v.is_null() => spec.validate(v.clone()),
        _ => Ok(spec.default_value().unwrap_or(Value::Null)),
    }
}

fn string(values: &ConfigMap, key: &str) -> ConfigResult<String> {
    Ok(lookup(values, key)?.as_str().unwrap_or_default().to_string())
}

fn integer<T: TryFrom<i64>>(values: &ConfigMap, key: &str) -> ConfigResult<T> {
    let n = lookup(values, key)?.as_i64().unwrap_or_default();
    T::try_from(n).map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{} out of range", n),
    })
}

fn secret(values: &ConfigMap, key: &str) -> ConfigResult<Option<SecretString>> {
    Ok(lookup(values, key)?
        .as_str()
        .filter(|s| !s.is_empty())
        .map(|s| SecretString::from(s.to_string())))
}

impl Settings {
    /// Builds settings from a merged map. Missing keys take defaults.
    pub fn from_map(values: &ConfigMap) -> ConfigResult<Self> {
        let mode = string(values, "sandboxMode")?;
        Ok(Self {
            model: string(values, "model")?,
            log_level: string(values, "logLevel")?,
            sandbox_mode: mode.parse().map_err(|e: String| ConfigError::InvalidValue {
                key: "sandboxMode".into(),
                message: e,
            })?,
            sandbox_image: string(values, "sandboxImage")?,
            sandbox_timeout_ms: integer(values, "sandboxTimeoutMs")?,
            sandbox_memory_limit_mb: integer(values, "sandboxMemoryLimitMb")?,
            sandbox_network_enabled: lookup(values, "sandboxNetworkEnabled")?
                .as_bool()
                .unwrap_or(false),
            context_max_tokens: integer(values, "contextMaxTokens")?,
            session_max_age_days: integer(values, "sessionMaxAgeDays")?,
            session_max_sessions: integer(values, "sessionMaxSessions")?,
            checkpoint_max_operations: integer(values, "checkpointMaxOperations")?,
            api_key: secret(values, "apiKey")?,
            refresh_token: secret(values, "refreshToken")?,
        })
    }

    fn fallback() -> Self {
        Self {
            model: String::new(),
            log_level: "info".into(),
            sandbox_mode: SandboxMode::Auto,
            sandbox_image: crate::sandbox::DEFAULT_IMAGE.into(),
            sandbox_timeout_ms: 30_000,
            sandbox_memory_limit_mb: 512,
            sandbox_network_enabled: false,
            context_max_tokens: 100_000,
            session_max_age_days: 30,
            session_max_sessions: 100,
            checkpoint_max_operations: 100,
            api_key: None,
            refresh_token: None,
        }
    }

    pub fn sandbox_timeout(&self) -> Duration {
        Duration::from_millis(self.sandbox_timeout_ms)
    }

    pub fn execution_options(&self) -> ExecutionOptions {
        ExecutionOptions::new()
            .timeout(self.sandbox_timeout())
            .memory_limit(self.sandbox_memory_limit_mb * 1024 * 1024)
            .network(self.sandbox_network_enabled)
    }

    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig::new(self.sandbox_mode)
            .with_image(self.sandbox_image.clone())
            .with_defaults(self.execution_options())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.sandbox_mode, SandboxMode::Auto);
        assert_eq!(settings.sandbox_timeout(), Duration::from_secs(30));
        assert_eq!(settings.session_max_age_days, 30);
        assert!(settings.api_key.is_none());
    }

    #[test]
    fn test_from_map_and_sandbox_config() {
        let mut values = ConfigMap::new();
        values.insert("sandboxMode".into(), json!("subprocess"));
        values.insert("sandboxTimeoutMs".into(), json!(2500));
        values.insert("sandboxMemoryLimitMb".into(), json!(64));
        values.insert("apiKey".into(), json!("sk-1"));

        let settings = Settings::from_map(&values).unwrap();
        assert_eq!(settings.api_key.as_ref().unwrap().expose_secret(), "sk-1");
        assert!(!format!("{:?}", settings).contains("sk-1"));

        let config = settings.sandbox_config();
        assert_eq!(config.mode, SandboxMode::Subprocess);
        assert_eq!(config.defaults.timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.defaults.memory_limit_bytes, Some(64 * 1024 * 1024));
        assert!(!config.defaults.network_allowed());
    }

    #[test]
    fn test_invalid_value_rejected() {
        let mut values = ConfigMap::new();
        values.insert("sessionMaxSessions".into(), json!(-1));
        assert!(Settings::from_map(&values).is_err());
    }
}
