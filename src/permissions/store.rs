//! Global and project policy files, merged into one snapshot.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use super::{GlobalPermissions, PermissionError, PermissionResult, PolicyOverlay};

pub const POLICY_FILE: &str = "permissions.json";

/// Merged permission rules. Read-only once built; call [`PolicyStore::load`]
/// again to pick up file changes.
#[derive(Clone, Debug)]
pub struct PolicyStore {
    global: GlobalPermissions,
    project: Option<PolicyOverlay>,
    merged: GlobalPermissions,
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new(GlobalPermissions::default())
    }
}

impl PolicyStore {
    pub fn new(global: GlobalPermissions) -> Self {
        Self {
            merged: global.clone(),
            global,
            project: None,
        }
    }

    pub fn with_project(mut self, project: PolicyOverlay) -> Self {
        self.merged = self.global.merge(&project);
        self.project = Some(project);
        self
    }

    /// Loads both layers. A missing file means built-in defaults for the
    /// global layer and no overlay for the project layer.
    pub async fn load(
        global_path: Option<&Path>,
        project_path: Option<&Path>,
    ) -> PermissionResult<Self> {
        let global = match global_path {
            Some(path) => match read_policy::<GlobalPermissions>(path).await? {
                Some(global) => {
                    global.validate()?;
                    global
                }
                None => GlobalPermissions::default(),
            },
            None => GlobalPermissions::default(),
        };
        let mut store = Self::new(global);

        if let Some(path) = project_path
            && let Some(project) = read_policy::<PolicyOverlay>(path).await?
        {
            project.validate()?;
            store = store.with_project(project);
        }

        tracing::debug!(
            has_project = store.project.is_some(),
            deny_read = store.merged.file_read.deny.len(),
            deny_write = store.merged.file_write.deny.len(),
            deny_shell = store.merged.shell_execute.deny.len(),
            "Loaded permission policy"
        );
        Ok(store)
    }

    /// Loads from the standard locations for `project_root`.
    pub async fn discover(project_root: &Path) -> PermissionResult<Self> {
        let global = crate::config::config_dir().map(|dir| dir.join(POLICY_FILE));
        let project = project_policy_path(project_root);
        Self::load(global.as_deref(), Some(&project)).await
    }

    pub fn global(&self) -> &GlobalPermissions {
        &self.global
    }

    pub fn project(&self) -> Option<&PolicyOverlay> {
        self.project.as_ref()
    }

    pub fn merged(&self) -> &GlobalPermissions {
        &self.merged
    }
}

pub fn project_policy_path(project_root: &Path) -> PathBuf {
    project_root
        .join(crate::config::PROJECT_DIR)
        .join(POLICY_FILE)
}

async fn read_policy<T: DeserializeOwned>(path: &Path) -> PermissionResult<Option<T>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(PermissionError::Load {
                path: path.to_path_buf(),
                message: e.to_string(),
            });
        }
    };

    let policy = serde_json::from_str(&content).map_err(|e| PermissionError::Load {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(Some(policy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_files_use_defaults() {
        let dir = tempdir().unwrap();
        let store = PolicyStore::load(
            Some(&dir.path().join("nope.json")),
            Some(&dir.path().join("also-nope.json")),
        )
        .await
        .unwrap();

        assert_eq!(store.merged(), &GlobalPermissions::default());
        assert!(store.project().is_none());
    }

    #[tokio::test]
    async fn test_project_layer_merges() {
        let dir = tempdir().unwrap();
        let global = dir.path().join("global.json");
        let project = dir.path().join("project.json");
        std::fs::write(
            &global,
            r#"{"fileRead": {"allow": ["./**/*"], "deny": ["**/.env*"]}}"#,
        )
        .unwrap();
        std::fs::write(
            &project,
            r#"{"fileRead": {"allow": ["/opt/shared/**"], "deny": ["**/secrets/**"]},
                "requireApproval": ["deploy"]}"#,
        )
        .unwrap();

        let store = PolicyStore::load(Some(&global), Some(&project))
            .await
            .unwrap();
        let merged = store.merged();
        assert_eq!(merged.file_read.allow, vec!["./**/*", "/opt/shared/**"]);
        assert_eq!(merged.file_read.deny, vec!["**/.env*", "**/secrets/**"]);
        assert!(merged.requires_approval("deploy"));
        // Unspecified capabilities keep built-in defaults.
        assert_eq!(
            merged.shell_execute,
            GlobalPermissions::default().shell_execute
        );
    }

    #[tokio::test]
    async fn test_project_file_cannot_widen_global_allow_list() {
        let dir = tempdir().unwrap();
        let global = dir.path().join("global.json");
        let project = dir.path().join("project.json");
        std::fs::write(&global, r#"{"shellExecute": {"allow": ["git *"]}}"#).unwrap();
        std::fs::write(&project, r#"{"fileRead": {"deny": ["**/secrets/**"]}}"#).unwrap();

        let store = PolicyStore::load(Some(&global), Some(&project))
            .await
            .unwrap();
        let merged = store.merged();
        assert_eq!(merged.shell_execute.allow, vec!["git *"]);
        assert!(merged.file_read.deny.contains(&"**/secrets/**".to_string()));

        let pm = crate::permissions::PermissionManager::from_store(&store, dir.path());
        assert!(pm.can_execute_command("python3 -c 1").is_denied());
        assert!(pm.can_execute_command("git status").is_allowed());
    }

    #[tokio::test]
    async fn test_invalid_project_glob_rejected() {
        let dir = tempdir().unwrap();
        let project = dir.path().join("project.json");
        std::fs::write(&project, r#"{"shellExecute": {"deny": ["[oops"]}}"#).unwrap();

        let result = PolicyStore::load(None, Some(&project)).await;
        assert!(matches!(
            result,
            Err(PermissionError::InvalidPattern { .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_policy_is_an_error() {
        let dir = tempdir().unwrap();
        let global = dir.path().join("global.json");
        std::fs::write(&global, "{ not json").unwrap();

        let result = PolicyStore::load(Some(&global), None).await;
        assert!(matches!(result, Err(PermissionError::Load { .. })));
    }

    #[tokio::test]
    async fn test_invalid_glob_rejected() {
        let dir = tempdir().unwrap();
        let global = dir.path().join("global.json");
        std::fs::write(&global, r#"{"fileWrite": {"allow": ["[oops"]}}"#).unwrap();

        let result = PolicyStore::load(Some(&global), None).await;
        assert!(matches!(
            result,
            Err(PermissionError::InvalidPattern { .. })
        ));
    }
}
