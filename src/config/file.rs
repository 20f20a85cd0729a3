//! File-based Configuration Provider
//!
//! Plain values are stored as top-level JSON keys. Sensitive values are
//! sealed together under [`SECRETS_KEY`] and never written in clear.

use std::path::{Path, PathBuf};

use serde_json::Value;

use super::crypto::{EncryptedBlob, SecretCipher};
use super::provider::{ConfigMap, ConfigProvider, ConfigSource};
use super::validator::key_spec;
use super::{ConfigError, ConfigResult};
use crate::common::fs::{read_json, write_atomic};

/// Key holding the encrypted blob inside a config file.
pub const SECRETS_KEY: &str = "_secrets";

#[derive(Debug, Clone)]
pub struct FileConfigProvider {
    path: PathBuf,
    source: ConfigSource,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>, source: ConfigSource) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Writes `values`, sealing sensitive keys. Null values are dropped.
    pub async fn save(&self, values: &ConfigMap) -> ConfigResult<()> {
        let mut plain = ConfigMap::new();
        let mut secrets = ConfigMap::new();
        for (key, value) in values {
            if value.is_null() {
                continue;
            }
            let sensitive = key_spec(key).map(|s| s.sensitive).unwrap_or(false);
            if sensitive {
                secrets.insert(key.clone(), value.clone());
            } else {
                plain.insert(key.clone(), value.clone());
            }
        }

        if !secrets.is_empty() {
            let cipher = SecretCipher::generate()?;
            let blob = cipher.seal(&serde_json::to_vec(&secrets)?)?;
            plain.insert(SECRETS_KEY.to_string(), serde_json::to_value(blob)?);
        }

        let write_failed = |e: std::io::Error| ConfigError::WriteFailed {
            path: self.path.clone(),
            message: e.to_string(),
        };
        let bytes = serde_json::to_vec_pretty(&plain)?;
        write_atomic(&self.path, &bytes).await.map_err(write_failed)?;

        if let Some(parent) = self.path.parent() {
            restrict_permissions(parent, 0o700);
        }
        restrict_permissions(&self.path, 0o600);
        Ok(())
    }
}

/// Tightens mode bits; failures are logged and otherwise ignored.
#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)) {
        tracing::warn!(path = %path.display(), error = %e, "failed to restrict permissions");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) {}

fn open_secrets(blob: Value) -> ConfigResult<ConfigMap> {
    let blob: EncryptedBlob = serde_json::from_value(blob).map_err(|e| ConfigError::DecryptFailed {
        message: format!("malformed secrets blob: {}", e),
    })?;
    let plaintext = SecretCipher::for_blob(&blob)?.open(&blob)?;
    serde_json::from_slice(&plaintext).map_err(|e| ConfigError::DecryptFailed {
        message: format!("malformed secrets payload: {}", e),
    })
}

#[async_trait::async_trait]
impl ConfigProvider for FileConfigProvider {
    fn name(&self) -> &str {
        "file"
    }

    fn source(&self) -> ConfigSource {
        self.source
    }

    async fn load(&self) -> ConfigResult<ConfigMap> {
        let Some(mut map) = read_json::<ConfigMap>(&self.path).await? else {
            return Ok(ConfigMap::new());
        };
        if let Some(blob) = map.remove(SECRETS_KEY) {
            map.extend(open_secrets(blob)?);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let provider = FileConfigProvider::new(dir.path().join("none.json"), ConfigSource::Global);
        assert!(!provider.exists());
        assert!(provider.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_secrets_are_encrypted_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cfg").join("config.json");
        let provider = FileConfigProvider::new(&path, ConfigSource::Global);

        let mut values = ConfigMap::new();
        values.insert("model".into(), json!("m1"));
        values.insert("apiKey".into(), json!("sk-very-secret"));
        values.insert("logLevel".into(), Value::Null);
        provider.save(&values).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("sk-very-secret"));
        assert!(raw.contains(SECRETS_KEY));
        assert!(!raw.contains("logLevel"));

        let loaded = provider.load().await.unwrap();
        assert_eq!(loaded.get("model"), Some(&json!("m1")));
        assert_eq!(loaded.get("apiKey"), Some(&json!("sk-very-secret")));
        assert!(!loaded.contains_key(SECRETS_KEY));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_corrupt_secrets_fail_to_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"_secrets":{"version":1,"salt":"AAAAAAAAAAAAAAAAAAAAAA==","nonce":"AAAAAAAAAAAAAAAA","ciphertext":"AAAA"}}"#,
        )
        .unwrap();

        let provider = FileConfigProvider::new(&path, ConfigSource::Global);
        assert!(matches!(
            provider.load().await,
            Err(ConfigError::DecryptFailed { .. })
        ));
    }
}
