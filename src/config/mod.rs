//! Layered configuration.
//!
//! Values resolve from, highest first: `CODING_AGENT_*` environment
//! variables, the project file `<project>/.coding-agent/config.json`, the
//! nearest `.coding-agent.json` above the working directory, the global
//! `<config_dir>/config.json`, then built-in defaults.
//!
//! ```rust,no_run
//! use coding_agent_core::config::ConfigManager;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigManager::discover(".")?;
//! config.set("sandboxTimeoutMs", 60_000.into()).await?;
//! config.save_config().await?;
//!
//! let settings = config.settings().await?;
//! let sandbox = settings.sandbox_config();
//! # Ok(())
//! # }
//! ```

mod crypto;
mod env;
mod file;
mod manager;
mod provider;
mod settings;
mod validator;

pub use crypto::{EncryptedBlob, SecretCipher};
pub use env::{ENV_PREFIX, EnvConfigProvider};
pub use file::FileConfigProvider;
pub use manager::{ConfigManager, ConfigPaths, EffectiveValue, REDACTED};
pub use provider::{ConfigMap, ConfigProvider, ConfigSource};
pub use settings::Settings;
pub use validator::{KNOWN_KEYS, KeySpec, ValueType, key_spec};

use std::path::PathBuf;

use thiserror::Error;

/// Per-project state directory name, created in the project root.
pub const PROJECT_DIR: &str = ".coding-agent";
pub const CONFIG_FILE: &str = "config.json";
pub const LOCAL_CONFIG_FILE: &str = ".coding-agent.json";

const APP_NAME: &str = "coding-agent";

/// User-level configuration directory. `CODING_AGENT_CONFIG_DIR` overrides
/// the platform default.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("CODING_AGENT_CONFIG_DIR") {
        return Some(PathBuf::from(dir));
    }
    directories::ProjectDirs::from("", "", APP_NAME).map(|d| d.config_dir().to_path_buf())
}

/// User-level data directory holding the session database.
/// `CODING_AGENT_DATA_DIR` overrides the platform default.
pub fn data_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("CODING_AGENT_DATA_DIR") {
        return Some(PathBuf::from(dir));
    }
    directories::ProjectDirs::from("", "", APP_NAME).map(|d| d.data_dir().to_path_buf())
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown configuration key: {key}")]
    UnknownKey { key: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to write {path}: {message}")]
    WriteFailed { path: PathBuf, message: String },

    #[error("Failed to encrypt secrets: {message}")]
    EncryptFailed { message: String },

    #[error("Failed to decrypt stored secrets: {message}")]
    DecryptFailed { message: String },

    #[error("Configuration directory could not be determined")]
    NoConfigDir,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    ValidationErrors(ValidationErrors),
}

#[derive(Debug)]
pub struct ValidationErrors(pub Vec<ConfigError>);

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation failed: ")?;
        let msgs: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", msgs.join("; "))
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::UnknownKey {
            key: "nope".to_string(),
        };
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_validation_errors_join() {
        let err = ConfigError::ValidationErrors(ValidationErrors(vec![
            ConfigError::UnknownKey { key: "a".into() },
            ConfigError::InvalidValue {
                key: "b".into(),
                message: "expected integer".into(),
            },
        ]));
        assert_eq!(
            err.to_string(),
            "Validation failed: Unknown configuration key: a; Invalid value for b: expected integer"
        );
    }
}
