//! Checkpoint lifecycle and the file operation log.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use super::operations::{Operation, OperationKind, OperationLog, UndoData};
use super::vcs::{EMPTY_TREE, GitBackend, VersionControlBackend};
use super::{CheckpointError, CheckpointResult};
use crate::common::FileLock;
use crate::common::fs::{read_json, write_json};
use crate::config::PROJECT_DIR;
use crate::security::normalize_path;

/// Directory under the project dir holding the store, index and log.
pub const CHECKPOINT_DIR: &str = "checkpoints";
pub const DEFAULT_MAX_OPERATIONS: usize = 100;

const REPO_DIR: &str = "repo.git";
const INDEX_FILE: &str = "checkpoints.json";
const OPERATIONS_FILE: &str = "operations.json";
const LOCK_FILE: &str = ".lock";
/// Written into the state dir so the user's own repository ignores it.
const IGNORE_FILE: &str = ".gitignore";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub id: String,
    pub sha: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Operations recorded between the previous checkpoint and this one.
    pub operation_count: usize,
    /// Paths that differed from the previous checkpoint.
    pub files: Vec<String>,
}

impl Checkpoint {
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(8)]
    }
}

pub struct CheckpointManager {
    root: PathBuf,
    state_dir: PathBuf,
    vcs: Arc<dyn VersionControlBackend>,
    max_operations: usize,
    initialized: OnceCell<()>,
}

impl std::fmt::Debug for CheckpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointManager")
            .field("root", &self.root)
            .field("state_dir", &self.state_dir)
            .field("max_operations", &self.max_operations)
            .finish()
    }
}

impl CheckpointManager {
    /// Manager for `root` backed by a git side-store. Nothing touches disk
    /// until the first operation.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = absolute(root.as_ref());
        let state_dir = root.join(PROJECT_DIR).join(CHECKPOINT_DIR);
        let vcs = GitBackend::new(state_dir.join(REPO_DIR), &root)
            .exclude(format!("/{}/", PROJECT_DIR));
        Self::with_backend(root, Arc::new(vcs))
    }

    pub fn with_backend(root: impl AsRef<Path>, vcs: Arc<dyn VersionControlBackend>) -> Self {
        let root = absolute(root.as_ref());
        Self {
            state_dir: root.join(PROJECT_DIR).join(CHECKPOINT_DIR),
            root,
            vcs,
            max_operations: DEFAULT_MAX_OPERATIONS,
            initialized: OnceCell::new(),
        }
    }

    pub fn with_max_operations(mut self, max: usize) -> Self {
        self.max_operations = max.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    async fn ensure_init(&self) -> CheckpointResult<()> {
        self.initialized
            .get_or_try_init(|| async {
                self.ignore_state_dir().await?;
                self.vcs.init().await
            })
            .await
            .map(|_| ())
    }

    async fn lock(&self) -> CheckpointResult<FileLock> {
        let lock = FileLock::acquire(self.state_dir.join(LOCK_FILE)).await?;
        self.ignore_state_dir().await?;
        Ok(lock)
    }

    async fn ignore_state_dir(&self) -> CheckpointResult<()> {
        let path = self.state_dir.join(IGNORE_FILE);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tokio::fs::create_dir_all(&self.state_dir).await?;
            tokio::fs::write(&path, "*\n").await?;
        }
        Ok(())
    }

    async fn load_index(&self) -> CheckpointResult<Vec<Checkpoint>> {
        Ok(read_json(&self.state_dir.join(INDEX_FILE))
            .await?
            .unwrap_or_default())
    }

    async fn load_log(&self) -> CheckpointResult<OperationLog> {
        Ok(read_json(&self.state_dir.join(OPERATIONS_FILE))
            .await?
            .unwrap_or_default())
    }

    async fn save_log(&self, log: &OperationLog) -> CheckpointResult<()> {
        Ok(write_json(&self.state_dir.join(OPERATIONS_FILE), log).await?)
    }

    /// Snapshots the whole working directory.
    pub async fn create_checkpoint(&self, message: &str) -> CheckpointResult<Checkpoint> {
        self.ensure_init().await?;
        let _lock = self.lock().await?;

        let files = self
            .vcs
            .status()
            .await?
            .into_iter()
            .map(|s| s.path)
            .collect();
        let sha = self.vcs.commit(message).await?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.vcs.pin(&format!("refs/checkpoints/{}", id), &sha).await?;

        let mut log = self.load_log().await?;
        let operation_count = std::mem::take(&mut log.since_checkpoint);
        self.save_log(&log).await?;

        let checkpoint = Checkpoint {
            id,
            sha,
            message: message.to_string(),
            timestamp: Utc::now(),
            operation_count,
            files,
        };
        let mut index = self.load_index().await?;
        index.push(checkpoint.clone());
        write_json(&self.state_dir.join(INDEX_FILE), &index).await?;

        tracing::info!(
            id = checkpoint.short_id(),
            files = checkpoint.files.len(),
            "checkpoint created"
        );
        Ok(checkpoint)
    }

    /// Newest first.
    pub async fn list_checkpoints(&self) -> CheckpointResult<Vec<Checkpoint>> {
        let mut index = self.load_index().await?;
        index.reverse();
        Ok(index)
    }

    /// Looks up by full id or unique prefix.
    pub async fn get_checkpoint(&self, id_or_prefix: &str) -> CheckpointResult<Checkpoint> {
        let index = self.load_index().await?;
        resolve(&index, id_or_prefix).map(|(_, c)| c.clone())
    }

    /// Checkpoint against the current working tree.
    pub async fn get_diff(&self, id_or_prefix: &str) -> CheckpointResult<String> {
        self.ensure_init().await?;
        let checkpoint = self.get_checkpoint(id_or_prefix).await?;
        let _lock = self.lock().await?;
        self.vcs.diff(&checkpoint.sha, None).await
    }

    pub async fn get_diff_between(&self, from: &str, to: &str) -> CheckpointResult<String> {
        self.ensure_init().await?;
        let index = self.load_index().await?;
        let (_, from) = resolve(&index, from)?;
        let (_, to) = resolve(&index, to)?;
        self.vcs.diff(&from.sha, Some(&to.sha)).await
    }

    /// What changed between the previous checkpoint and this one.
    pub async fn checkpoint_changes(&self, id_or_prefix: &str) -> CheckpointResult<String> {
        self.ensure_init().await?;
        let index = self.load_index().await?;
        let (position, checkpoint) = resolve(&index, id_or_prefix)?;
        let parent = match position {
            0 => EMPTY_TREE,
            n => index[n - 1].sha.as_str(),
        };
        self.vcs.diff(parent, Some(&checkpoint.sha)).await
    }

    /// Resets the working tree to the checkpoint. Uncommitted changes and
    /// files created since are discarded.
    pub async fn restore_checkpoint(&self, id_or_prefix: &str) -> CheckpointResult<Checkpoint> {
        self.ensure_init().await?;
        let checkpoint = self.get_checkpoint(id_or_prefix).await?;
        let _lock = self.lock().await?;

        self.vcs
            .checkout(&checkpoint.sha)
            .await
            .map_err(|e| CheckpointError::RestoreFailed {
                id: checkpoint.id.clone(),
                message: e.to_string(),
            })?;

        tracing::info!(id = checkpoint.short_id(), "checkpoint restored");
        Ok(checkpoint)
    }

    /// Newest first.
    pub async fn list_operations(&self, limit: Option<usize>) -> CheckpointResult<Vec<Operation>> {
        Ok(self.load_log().await?.recent(limit))
    }

    /// Operations recorded since the last checkpoint.
    pub async fn pending_operations(&self) -> CheckpointResult<usize> {
        Ok(self.load_log().await?.since_checkpoint)
    }

    /// Call before creating `path`; undo removes it.
    pub async fn record_file_create(&self, path: impl AsRef<Path>) -> CheckpointResult<Operation> {
        self.record(OperationKind::Create, path.as_ref(), UndoData::Remove)
            .await
    }

    /// Call before overwriting `path`. `previous` is its content, or `None`
    /// if it does not exist yet.
    pub async fn record_file_write(
        &self,
        path: impl AsRef<Path>,
        previous: Option<&[u8]>,
    ) -> CheckpointResult<Operation> {
        self.record(
            OperationKind::Write,
            path.as_ref(),
            UndoData::from_previous(previous),
        )
        .await
    }

    /// Call before deleting `path`; undo rewrites `previous`.
    pub async fn record_file_delete(
        &self,
        path: impl AsRef<Path>,
        previous: &[u8],
    ) -> CheckpointResult<Operation> {
        self.record(
            OperationKind::Delete,
            path.as_ref(),
            UndoData::from_previous(Some(previous)),
        )
        .await
    }

    async fn record(
        &self,
        kind: OperationKind,
        path: &Path,
        undo_data: UndoData,
    ) -> CheckpointResult<Operation> {
        let _lock = self.lock().await?;
        let op = Operation::new(kind, self.relative(path), undo_data);
        let mut log = self.load_log().await?;
        log.push(op.clone(), self.max_operations);
        self.save_log(&log).await?;
        tracing::debug!(kind = %op.kind, path = %op.path.display(), "operation recorded");
        Ok(op)
    }

    /// Reverts the most recent operation and drops it from the log.
    pub async fn undo_last_operation(&self) -> CheckpointResult<Option<Operation>> {
        let _lock = self.lock().await?;
        let mut log = self.load_log().await?;
        let Some(op) = log.operations.last().cloned() else {
            return Ok(None);
        };

        op.undo_data.apply(&self.root.join(&op.path)).await?;
        log.pop();
        self.save_log(&log).await?;

        tracing::info!(kind = %op.kind, path = %op.path.display(), "operation undone");
        Ok(Some(op))
    }

    fn relative(&self, path: &Path) -> PathBuf {
        let abs = normalize_path(&self.root.join(path));
        abs.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or(abs)
    }
}

fn absolute(path: &Path) -> PathBuf {
    normalize_path(&std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()))
}

fn resolve<'a>(
    index: &'a [Checkpoint],
    id_or_prefix: &str,
) -> CheckpointResult<(usize, &'a Checkpoint)> {
    let not_found = || CheckpointError::NotFound {
        id: id_or_prefix.to_string(),
    };
    if id_or_prefix.is_empty() {
        return Err(not_found());
    }
    if let Some(found) = index.iter().enumerate().find(|(_, c)| c.id == id_or_prefix) {
        return Ok(found);
    }

    let mut matches = index
        .iter()
        .enumerate()
        .filter(|(_, c)| c.id.starts_with(id_or_prefix));
    match (matches.next(), matches.count()) {
        (None, _) => Err(not_found()),
        (Some(found), 0) => Ok(found),
        (Some(_), rest) => Err(CheckpointError::AmbiguousPrefix {
            prefix: id_or_prefix.to_string(),
            matches: rest + 1,
        }),
    }
}
