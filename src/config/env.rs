//! Environment Variable Configuration Provider
//!
//! Read-only: `sandboxTimeoutMs` is read from `CODING_AGENT_SANDBOX_TIMEOUT_MS`.

use super::provider::{ConfigMap, ConfigProvider, ConfigSource};
use super::validator::KNOWN_KEYS;
use super::{ConfigError, ConfigResult};

pub const ENV_PREFIX: &str = "CODING_AGENT_";

#[derive(Debug, Clone)]
pub struct EnvConfigProvider {
    prefix: String,
}

impl EnvConfigProvider {
    pub fn new() -> Self {
        Self::prefixed(ENV_PREFIX)
    }

    pub fn prefixed(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// `sandboxMemoryLimitMb` becomes `<PREFIX>SANDBOX_MEMORY_LIMIT_MB`.
    pub fn env_key(&self, key: &str) -> String {
        let mut name = self.prefix.clone();
        for (i, c) in key.chars().enumerate() {
            if c.is_ascii_uppercase() && i > 0 {
                name.push('_');
            }
            name.push(c.to_ascii_uppercase());
        }
        name
    }
}

impl Default for EnvConfigProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ConfigProvider for EnvConfigProvider {
    fn name(&self) -> &str {
        "env"
    }

    fn source(&self) -> ConfigSource {
        ConfigSource::Env
    }

    async fn load(&self) -> ConfigResult<ConfigMap> {
        let mut map = ConfigMap::new();
        for spec in KNOWN_KEYS {
            let var = self.env_key(spec.key);
            match std::env::var(&var) {
                Ok(raw) => {
                    map.insert(spec.key.to_string(), spec.parse(&raw)?);
                }
                Err(std::env::VarError::NotPresent) => {}
                Err(e) => {
                    return Err(ConfigError::InvalidValue {
                        key: spec.key.to_string(),
                        message: format!("{}: {}", var, e),
                    });
                }
            }
        }
        Ok(map)
    }
}
