//! Merged configuration with pending writes to the global file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use super::env::EnvConfigProvider;
use super::file::FileConfigProvider;
use super::provider::{ConfigMap, ConfigProvider, ConfigSource};
use super::settings::Settings;
use super::validator::{KNOWN_KEYS, key_spec};
use super::{
    CONFIG_FILE, ConfigError, ConfigResult, LOCAL_CONFIG_FILE, PROJECT_DIR, ValidationErrors,
    config_dir,
};
use crate::common::FileLock;

/// Shown in place of sensitive values.
pub const REDACTED: &str = "********";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    pub global: PathBuf,
    pub local: Option<PathBuf>,
    pub project: Option<PathBuf>,
}

impl ConfigPaths {
    /// Standard locations for a process working in `working_dir`.
    pub fn discover(working_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let global = config_dir().ok_or(ConfigError::NoConfigDir)?.join(CONFIG_FILE);
        Ok(Self::for_project(global, working_dir))
    }

    pub fn for_project(global: impl Into<PathBuf>, working_dir: impl AsRef<Path>) -> Self {
        let working_dir = working_dir.as_ref();
        let local = working_dir
            .ancestors()
            .map(|dir| dir.join(LOCAL_CONFIG_FILE))
            .find(|candidate| candidate.is_file());
        Self {
            global: global.into(),
            local,
            project: Some(working_dir.join(PROJECT_DIR).join(CONFIG_FILE)),
        }
    }

    pub fn global_only(global: impl Into<PathBuf>) -> Self {
        Self {
            global: global.into(),
            local: None,
            project: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveValue {
    pub key: String,
    pub value: Value,
    pub source: ConfigSource,
}

#[derive(Debug, Default)]
struct Pending {
    reset: bool,
    /// `Null` marks a removal.
    values: ConfigMap,
}

type Layers = Vec<(ConfigSource, ConfigMap)>;

pub struct ConfigManager {
    global: FileConfigProvider,
    /// Lowest precedence first, all above the global file.
    overlays: Vec<Box<dyn ConfigProvider>>,
    cache: RwLock<Option<Arc<Layers>>>,
    pending: Mutex<Pending>,
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigManager")
            .field("global", &self.global.path())
            .field(
                "overlays",
                &self.overlays.iter().map(|p| p.source()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ConfigManager {
    pub fn discover(working_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        Ok(Self::new(ConfigPaths::discover(working_dir)?))
    }

    pub fn new(paths: ConfigPaths) -> Self {
        Self::with_env(paths, EnvConfigProvider::new())
    }

    pub fn with_env(paths: ConfigPaths, env: EnvConfigProvider) -> Self {
        let mut overlays: Vec<Box<dyn ConfigProvider>> = Vec::new();
        if let Some(local) = paths.local {
            overlays.push(Box::new(FileConfigProvider::new(local, ConfigSource::Local)));
        }
        if let Some(project) = paths.project {
            overlays.push(Box::new(FileConfigProvider::new(
                project,
                ConfigSource::Project,
            )));
        }
        overlays.push(Box::new(env));

        Self {
            global: FileConfigProvider::new(paths.global, ConfigSource::Global),
            overlays,
            cache: RwLock::new(None),
            pending: Mutex::new(Pending::default()),
        }
    }

    pub fn global_path(&self) -> &Path {
        self.global.path()
    }

    /// Whether the global config file exists.
    pub fn exists(&self) -> bool {
        self.global.exists()
    }

    /// Drops cached layers so the next read goes to disk.
    pub async fn reload(&self) {
        *self.cache.write().await = None;
    }

    async fn layers(&self) -> ConfigResult<Arc<Layers>> {
        if let Some(layers) = self.cache.read().await.as_ref() {
            return Ok(layers.clone());
        }

        let mut cache = self.cache.write().await;
        if let Some(layers) = cache.as_ref() {
            return Ok(layers.clone());
        }
        let mut layers = vec![(ConfigSource::Global, self.global.load().await?)];
        for provider in &self.overlays {
            let values = provider.load().await?;
            tracing::trace!(provider = provider.name(), source = %provider.source(), keys = values.len(), "config layer loaded");
            layers.push((provider.source(), values));
        }
        let layers = Arc::new(layers);
        *cache = Some(layers.clone());
        Ok(layers)
    }

    /// Layers with pending writes applied to the global one.
    async fn effective_layers(&self) -> ConfigResult<Layers> {
        let mut layers = (*self.layers().await?).clone();
        let pending = self.pending.lock().await;
        if let Some((_, global)) = layers.first_mut() {
            apply_pending(global, &pending);
        }
        Ok(layers)
    }

    fn resolve(layers: &Layers, key: &str) -> Option<(Value, ConfigSource)> {
        let from_layers = layers.iter().rev().find_map(|(source, values)| {
            values
                .get(key)
                .filter(|v| !v.is_null())
                .map(|v| (v.clone(), *source))
        });
        from_layers.or_else(|| {
            key_spec(key)
                .ok()
                .and_then(|spec| spec.default_value())
                .map(|v| (v, ConfigSource::Default))
        })
    }

    /// Effective value of `key`. Sensitive values come back redacted; use
    /// [`settings`](Self::settings) to read them.
    pub async fn get(&self, key: &str) -> ConfigResult<Option<Value>> {
        let spec = key_spec(key)?;
        let layers = self.effective_layers().await?;
        Ok(Self::resolve(&layers, key).map(|(value, _)| redact(spec.sensitive, value)))
    }

    /// Stages a value for the global file. Persisted by
    /// [`save_config`](Self::save_config); `Null` removes the key.
    pub async fn set(&self, key: &str, value: Value) -> ConfigResult<()> {
        let value = key_spec(key)?.validate(value)?;
        self.pending.lock().await.values.insert(key.to_string(), value);
        tracing::debug!(key, "config value staged");
        Ok(())
    }

    /// Stages several values; nothing is staged if any is invalid.
    pub async fn update(&self, partial: ConfigMap) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut validated = ConfigMap::new();
        for (key, value) in partial {
            match key_spec(&key).and_then(|spec| spec.validate(value)) {
                Ok(value) => {
                    validated.insert(key, value);
                }
                Err(e) => errors.push(e),
            }
        }
        if !errors.is_empty() {
            return Err(ConfigError::ValidationErrors(ValidationErrors(errors)));
        }
        self.pending.lock().await.values.extend(validated);
        Ok(())
    }

    /// Stages clearing every global value back to defaults.
    pub async fn reset(&self) {
        let mut pending = self.pending.lock().await;
        pending.reset = true;
        pending.values.clear();
    }

    /// Every known key with a value, sensitive ones redacted.
    pub async fn get_all(&self) -> ConfigResult<ConfigMap> {
        let layers = self.effective_layers().await?;
        Ok(KNOWN_KEYS
            .iter()
            .filter_map(|spec| {
                Self::resolve(&layers, spec.key)
                    .map(|(value, _)| (spec.key.to_string(), redact(spec.sensitive, value)))
            })
            .collect())
    }

    /// Value and originating layer for each known key that has a value.
    pub async fn get_effective_config(&self) -> ConfigResult<Vec<EffectiveValue>> {
        let layers = self.effective_layers().await?;
        Ok(KNOWN_KEYS
            .iter()
            .filter_map(|spec| {
                Self::resolve(&layers, spec.key).map(|(value, source)| EffectiveValue {
                    key: spec.key.to_string(),
                    value: redact(spec.sensitive, value),
                    source,
                })
            })
            .collect())
    }

    pub async fn settings(&self) -> ConfigResult<Settings> {
        let layers = self.effective_layers().await?;
        let merged: ConfigMap = KNOWN_KEYS
            .iter()
            .filter_map(|spec| {
                Self::resolve(&layers, spec.key).map(|(value, _)| (spec.key.to_string(), value))
            })
            .collect();
        Settings::from_map(&merged)
    }

    pub async fn has_pending_changes(&self) -> bool {
        let pending = self.pending.lock().await;
        pending.reset || !pending.values.is_empty()
    }

    /// Persists staged writes. The global file is re-read under a lock so
    /// concurrent writers' keys survive.
    pub async fn save_config(&self) -> ConfigResult<()> {
        let mut pending = self.pending.lock().await;
        let lock_path = lock_path_for(self.global.path());
        let _lock = FileLock::acquire(&lock_path)
            .await
            .map_err(|e| ConfigError::WriteFailed {
                path: lock_path.clone(),
                message: e.to_string(),
            })?;

        let mut values = self.global.load().await?;
        apply_pending(&mut values, &pending);
        self.global.save(&values).await?;

        *pending = Pending::default();
        drop(pending);
        self.reload().await;

        tracing::info!(path = %self.global.path().display(), keys = values.len(), "configuration saved");
        Ok(())
    }
}

fn apply_pending(values: &mut ConfigMap, pending: &Pending) {
    if pending.reset {
        values.clear();
    }
    for (key, value) in &pending.values {
        if value.is_null() {
            values.remove(key);
        } else {
            values.insert(key.clone(), value.clone());
        }
    }
}

fn redact(sensitive: bool, value: Value) -> Value {
    if sensitive {
        Value::from(REDACTED)
    } else {
        value
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}.lock", name))
}
