//! Checkpoint & Undo Tests
//!
//! Snapshots of a scratch working directory through the git side-store.
//! Tests return early when no `git` binary is on the PATH.
//!
//! Run: cargo nextest run --test checkpoint_tests

use std::fs;
use std::path::Path;

use coding_agent_core::checkpoint::{CheckpointError, CheckpointManager, OperationKind};

fn git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|out| out.status.success())
}

/// Runs git in `dir` as the user would, failing the test on error.
fn git(dir: &Path, args: &[&str]) -> String {
    let output = std::process::Command::new("git")
        .current_dir(dir)
        .args([
            "-c",
            "user.name=test",
            "-c",
            "user.email=test@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?}: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn write(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

// =============================================================================
// Snapshot and restore
// =============================================================================

mod restore_tests {
    use super::*;

    #[tokio::test]
    async fn test_restore_is_byte_identical() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let binary: Vec<u8> = (0u8..=255).collect();
        write(root, "README.md", b"# demo\n");
        write(root, "src/lib.rs", b"pub fn answer() -> u32 { 42 }\n");
        write(root, "assets/blob.bin", &binary);

        let manager = CheckpointManager::new(root);
        let checkpoint = manager.create_checkpoint("baseline").await.unwrap();
        assert_eq!(checkpoint.message, "baseline");
        assert!(checkpoint.files.iter().any(|f| f.ends_with("lib.rs")));

        write(root, "src/lib.rs", b"pub fn answer() -> u32 { 7 }\n");
        fs::remove_file(root.join("README.md")).unwrap();
        write(root, "src/extra.rs", b"// scratch\n");
        write(root, "notes/todo.txt", b"later\n");

        let restored = manager.restore_checkpoint(&checkpoint.id).await.unwrap();
        assert_eq!(restored.id, checkpoint.id);

        assert_eq!(fs::read(root.join("README.md")).unwrap(), b"# demo\n");
        assert_eq!(
            fs::read(root.join("src/lib.rs")).unwrap(),
            b"pub fn answer() -> u32 { 42 }\n"
        );
        assert_eq!(fs::read(root.join("assets/blob.bin")).unwrap(), binary);
        assert!(!root.join("src/extra.rs").exists());
        assert!(!root.join("notes/todo.txt").exists());

        // Checkpoint state itself survives the restore.
        assert_eq!(manager.list_checkpoints().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_restore_to_older_checkpoint() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "a.txt", b"one\n");

        let manager = CheckpointManager::new(root);
        let first = manager.create_checkpoint("first").await.unwrap();
        write(root, "a.txt", b"two\n");
        let second = manager.create_checkpoint("second").await.unwrap();

        let listed = manager.list_checkpoints().await.unwrap();
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);

        manager.restore_checkpoint(&first.id).await.unwrap();
        assert_eq!(fs::read(root.join("a.txt")).unwrap(), b"one\n");
        manager.restore_checkpoint(&second.id).await.unwrap();
        assert_eq!(fs::read(root.join("a.txt")).unwrap(), b"two\n");
    }

    #[tokio::test]
    async fn test_diffs() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "main.py", b"print('hi')\n");

        let manager = CheckpointManager::new(root);
        let first = manager.create_checkpoint("first").await.unwrap();
        assert!(manager.get_diff(&first.id).await.unwrap().is_empty());

        write(root, "main.py", b"print('bye')\n");
        let diff = manager.get_diff(&first.id).await.unwrap();
        assert!(diff.contains("-print('hi')"));
        assert!(diff.contains("+print('bye')"));

        let second = manager.create_checkpoint("second").await.unwrap();
        let between = manager.get_diff_between(&first.id, &second.id).await.unwrap();
        assert!(between.contains("+print('bye')"));

        let initial = manager.checkpoint_changes(&first.id).await.unwrap();
        assert!(initial.contains("+print('hi')"));
    }
}

// =============================================================================
// Coexisting with user repositories
// =============================================================================

mod repository_tests {
    use super::*;

    #[tokio::test]
    async fn test_user_repository_stays_clean() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        git(root, &["init", "-q"]);
        write(root, "src/main.rs", b"fn main() {}\n");
        git(root, &["add", "-A"]);
        git(root, &["commit", "-q", "-m", "initial"]);

        let manager = CheckpointManager::new(root);
        manager.create_checkpoint("snapshot").await.unwrap();
        manager.record_file_create("later.rs").await.unwrap();

        let status = git(root, &["status", "--porcelain", "--untracked-files=all"]);
        assert!(status.trim().is_empty(), "unexpected status: {status}");
        assert_eq!(git(root, &["rev-list", "--count", "HEAD"]).trim(), "1");
    }

    #[tokio::test]
    async fn test_unborn_nested_repository_is_skipped() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "top.txt", b"top\n");
        git(root, &["init", "-q", "vendor/fresh"]);
        write(root, "vendor/fresh/wip.txt", b"uncommitted\n");

        let manager = CheckpointManager::new(root);
        let checkpoint = manager.create_checkpoint("with nested").await.unwrap();
        assert!(checkpoint.files.iter().any(|f| f == "top.txt"));
        assert!(!checkpoint.files.iter().any(|f| f.starts_with("vendor/fresh")));
    }

    #[tokio::test]
    async fn test_committed_nested_repository_is_not_recorded() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "top.txt", b"v1\n");
        let nested = root.join("vendor/dep");
        git(root, &["init", "-q", "vendor/dep"]);
        write(&nested, "lib.txt", b"dep\n");
        git(&nested, &["add", "-A"]);
        git(&nested, &["commit", "-q", "-m", "dep"]);

        let manager = CheckpointManager::new(root);
        let first = manager.create_checkpoint("first").await.unwrap();
        assert!(!first.files.iter().any(|f| f.starts_with("vendor/dep")));

        write(root, "top.txt", b"v2\n");
        write(&nested, "lib.txt", b"dep changed\n");
        let second = manager.create_checkpoint("second").await.unwrap();
        assert_eq!(second.files, vec!["top.txt"]);

        manager.restore_checkpoint(&first.id).await.unwrap();
        assert_eq!(fs::read(root.join("top.txt")).unwrap(), b"v1\n");
        // The nested repository is left alone by restores.
        assert_eq!(fs::read(nested.join("lib.txt")).unwrap(), b"dep changed\n");
        assert!(nested.join(".git").exists());
    }
}

// =============================================================================
// Id prefixes
// =============================================================================

mod prefix_tests {
    use super::*;

    #[tokio::test]
    async fn test_unique_prefix_resolves() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "f.txt", b"v1\n");
        let manager = CheckpointManager::new(dir.path());
        let checkpoint = manager.create_checkpoint("only").await.unwrap();

        write(dir.path(), "f.txt", b"v2\n");
        let prefix = &checkpoint.id[..6];
        assert!(manager.get_diff(prefix).await.unwrap().contains("+v2"));
        manager.restore_checkpoint(prefix).await.unwrap();
        assert_eq!(fs::read(dir.path().join("f.txt")).unwrap(), b"v1\n");
    }

    #[tokio::test]
    async fn test_unmatched_and_empty_prefixes() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "f.txt", b"v1\n");
        let manager = CheckpointManager::new(dir.path());
        manager.create_checkpoint("only").await.unwrap();

        assert!(matches!(
            manager.restore_checkpoint("zzzz").await,
            Err(CheckpointError::NotFound { .. })
        ));
        assert!(matches!(
            manager.get_diff("").await,
            Err(CheckpointError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_ambiguous_prefix_is_rejected() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "f.txt", b"v\n");
        let manager = CheckpointManager::new(dir.path());

        // Ids are hex, so seventeen checkpoints must share a first character.
        let mut shared = None;
        let mut seen = Vec::new();
        for i in 0..17 {
            let checkpoint = manager.create_checkpoint(&format!("cp {i}")).await.unwrap();
            let first = checkpoint.id[..1].to_string();
            if seen.contains(&first) {
                shared = Some(first);
                break;
            }
            seen.push(first);
        }
        let shared = shared.unwrap();

        assert!(matches!(
            manager.restore_checkpoint(&shared).await,
            Err(CheckpointError::AmbiguousPrefix { matches, .. }) if matches >= 2
        ));
        assert_eq!(fs::read(dir.path().join("f.txt")).unwrap(), b"v\n");
    }
}

// =============================================================================
// Operation log
// =============================================================================

mod undo_tests {
    use super::*;

    #[tokio::test]
    async fn test_undo_write_then_create() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "config.toml", b"answer = 42\n");
        let manager = CheckpointManager::new(root);

        let previous = fs::read(root.join("config.toml")).unwrap();
        manager
            .record_file_write("config.toml", Some(&previous))
            .await
            .unwrap();
        write(root, "config.toml", b"answer = 0\n");

        manager.record_file_create("fresh.rs").await.unwrap();
        write(root, "fresh.rs", b"fn main() {}\n");

        let ops = manager.list_operations(None).await.unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].kind, OperationKind::Create);
        assert_eq!(manager.pending_operations().await.unwrap(), 2);

        let undone = manager.undo_last_operation().await.unwrap().unwrap();
        assert_eq!(undone.kind, OperationKind::Create);
        assert!(!root.join("fresh.rs").exists());

        let undone = manager.undo_last_operation().await.unwrap().unwrap();
        assert_eq!(undone.kind, OperationKind::Write);
        assert_eq!(fs::read(root.join("config.toml")).unwrap(), b"answer = 42\n");

        assert!(manager.undo_last_operation().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_undo_delete_restores_content() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "data/keep.json", b"{\"k\": 1}");
        let manager = CheckpointManager::new(root);

        let previous = fs::read(root.join("data/keep.json")).unwrap();
        manager
            .record_file_delete("data/keep.json", &previous)
            .await
            .unwrap();
        fs::remove_dir_all(root.join("data")).unwrap();

        manager.undo_last_operation().await.unwrap();
        assert_eq!(fs::read(root.join("data/keep.json")).unwrap(), b"{\"k\": 1}");
    }

    #[tokio::test]
    async fn test_checkpoint_counts_operations() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let manager = CheckpointManager::new(root);

        manager.record_file_create("a.txt").await.unwrap();
        write(root, "a.txt", b"a\n");
        manager.record_file_create("b.txt").await.unwrap();
        write(root, "b.txt", b"b\n");

        let checkpoint = manager.create_checkpoint("two files").await.unwrap();
        assert_eq!(checkpoint.operation_count, 2);
        assert_eq!(manager.pending_operations().await.unwrap(), 0);
        assert_eq!(manager.list_operations(Some(1)).await.unwrap().len(), 1);
    }
}
