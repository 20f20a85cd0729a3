//! Marker file naming the session an invocation continues by default.

use std::io;
use std::path::{Path, PathBuf};

use crate::common::fs::write_atomic;

/// Location of the current-session marker. Only `SessionManager` reads and
/// writes it.
#[derive(Debug, Clone)]
pub struct CurrentSessionPointer {
    path: PathBuf,
}

impl CurrentSessionPointer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> io::Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let id = content.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn write(&self, session_id: &str) -> io::Result<()> {
        write_atomic(&self.path, session_id.as_bytes()).await
    }

    pub async fn clear(&self) -> io::Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Branch checked out in `dir`, read from `.git/HEAD` without invoking git.
///
/// Returns `None` for detached heads and non-repositories. Worktrees and
/// submodules whose `.git` is a file pointing elsewhere are followed.
pub async fn detect_git_branch(dir: &Path) -> Option<String> {
    let mut current = Some(dir);
    while let Some(candidate) = current {
        let dot_git = candidate.join(".git");
        if let Some(git_dir) = resolve_git_dir(&dot_git).await {
            let head = tokio::fs::read_to_string(git_dir.join("HEAD")).await.ok()?;
            return head
                .trim()
                .strip_prefix("ref: refs/heads/")
                .map(str::to_string);
        }
        current = candidate.parent();
    }
    None
}

async fn resolve_git_dir(dot_git: &Path) -> Option<PathBuf> {
    let meta = tokio::fs::metadata(dot_git).await.ok()?;
    if meta.is_dir() {
        return Some(dot_git.to_path_buf());
    }
    let content = tokio::fs::read_to_string(dot_git).await.ok()?;
    let target = content.trim().strip_prefix("gitdir:")?.trim();
    let base = dot_git.parent()?;
    Some(base.join(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_pointer_lifecycle() {
        let dir = tempdir().unwrap();
        let pointer = CurrentSessionPointer::new(dir.path().join("current_session"));

        assert_eq!(pointer.read().await.unwrap(), None);
        pointer.write("abc").await.unwrap();
        assert_eq!(pointer.read().await.unwrap().as_deref(), Some("abc"));
        pointer.clear().await.unwrap();
        assert_eq!(pointer.read().await.unwrap(), None);
        pointer.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_detect_git_branch() {
        let dir = tempdir().unwrap();
        let git = dir.path().join(".git");
        std::fs::create_dir_all(&git).unwrap();
        std::fs::write(git.join("HEAD"), "ref: refs/heads/feature/x\n").unwrap();

        let nested = dir.path().join("src").join("deep");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(
            detect_git_branch(&nested).await.as_deref(),
            Some("feature/x")
        );

        std::fs::write(git.join("HEAD"), "4b825dc642cb6eb9a060e54bf8d69288fbee4904\n").unwrap();
        assert_eq!(detect_git_branch(dir.path()).await, None);
    }
}
