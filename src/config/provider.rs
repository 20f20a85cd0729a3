//! Configuration layer trait.

use serde::Serialize;
use serde_json::Value;

use super::ConfigResult;

/// Flat key/value map as stored in config files.
pub type ConfigMap = serde_json::Map<String, Value>;

/// Where an effective value came from, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    Global,
    Local,
    Project,
    Env,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Default => "default",
            Self::Global => "global",
            Self::Local => "local",
            Self::Project => "project",
            Self::Env => "env",
        };
        f.write_str(name)
    }
}

/// One configuration layer.
#[async_trait::async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    fn source(&self) -> ConfigSource;

    /// Every value this layer sets, secrets decrypted.
    async fn load(&self) -> ConfigResult<ConfigMap>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_ordering() {
        assert!(ConfigSource::Env > ConfigSource::Project);
        assert!(ConfigSource::Project > ConfigSource::Local);
        assert!(ConfigSource::Local > ConfigSource::Global);
        assert!(ConfigSource::Global > ConfigSource::Default);
        assert_eq!(ConfigSource::Local.to_string(), "local");
    }
}
