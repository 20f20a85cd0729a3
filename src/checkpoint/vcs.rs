//! Version-control plumbing behind checkpoints.
//!
//! [`GitBackend`] keeps its own git directory (the side-store) and points it
//! at the user's working directory as work tree, so checkpoint commits never
//! appear in the user's repository.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use super::{CheckpointError, CheckpointResult};

/// Tree object with no entries; the parent of a first checkpoint for diffs.
pub const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
    Untracked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatus {
    pub path: String,
    pub change: ChangeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub sha: String,
    pub subject: String,
    pub timestamp: i64,
}

#[async_trait]
pub trait VersionControlBackend: Send + Sync {
    /// Creates the store if it does not exist yet.
    async fn init(&self) -> CheckpointResult<()>;

    /// Paths that differ from the last commit, including untracked files.
    async fn status(&self) -> CheckpointResult<Vec<FileStatus>>;

    /// Stages everything and commits, returning the new commit id.
    async fn commit(&self, message: &str) -> CheckpointResult<String>;

    /// Keeps `sha` reachable under `name`.
    async fn pin(&self, name: &str, sha: &str) -> CheckpointResult<()>;

    /// Unified diff from `from` to `to`, or to the working tree when `to` is `None`.
    async fn diff(&self, from: &str, to: Option<&str>) -> CheckpointResult<String>;

    /// Makes the working tree match `sha`, deleting files it does not contain.
    async fn checkout(&self, sha: &str) -> CheckpointResult<()>;

    /// Newest commits first.
    async fn log(&self, limit: usize) -> CheckpointResult<Vec<CommitInfo>>;
}

/// Git side-store driven through the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitBackend {
    git_dir: PathBuf,
    work_tree: PathBuf,
    excludes: Vec<String>,
}

impl GitBackend {
    pub fn new(git_dir: impl Into<PathBuf>, work_tree: impl Into<PathBuf>) -> Self {
        Self {
            git_dir: git_dir.into(),
            work_tree: work_tree.into(),
            excludes: Vec::new(),
        }
    }

    /// Adds a pattern to the store's `info/exclude`.
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.excludes.push(pattern.into());
        self
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn work_tree(&self) -> &Path {
        &self.work_tree
    }

    async fn git<I, S>(&self, args: I) -> CheckpointResult<std::process::Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.work_tree)
            .env("LC_ALL", "C")
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .env_remove("GIT_DIR")
            .env_remove("GIT_WORK_TREE")
            .env_remove("GIT_INDEX_FILE")
            .arg("--git-dir")
            .arg(&self.git_dir)
            .arg("--work-tree")
            .arg(&self.work_tree)
            .args([
                "--no-pager",
                "-c",
                "color.ui=never",
                "-c",
                "core.autocrlf=false",
                "-c",
                "commit.gpgsign=false",
                "-c",
                "user.name=coding-agent",
                "-c",
                "user.email=checkpoints@coding-agent.invalid",
            ])
            .args(args)
            .kill_on_drop(true);

        cmd.output().await.map_err(|e| CheckpointError::Vcs {
            message: format!("failed to run git: {}", e),
        })
    }

    /// Runs git and returns stdout, failing on a non-zero exit.
    async fn git_ok<I, S>(&self, args: I) -> CheckpointResult<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<std::ffi::OsString> =
            args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
        let output = self.git(&args).await?;
        if !output.status.success() {
            return Err(CheckpointError::Vcs {
                message: format!(
                    "git {} failed: {}",
                    args.first().map(|a| a.to_string_lossy()).unwrap_or_default(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn stage_all(&self) -> CheckpointResult<()> {
        self.exclude_nested_repositories().await?;
        self.git_ok(["add", "-A", "--", "."]).await.map(|_| ())
    }

    /// Repositories nested in the work tree, as `dir/` paths. Git can only
    /// record them as gitlinks, and cannot stage one without a commit at all.
    async fn nested_repositories(&self) -> CheckpointResult<Vec<String>> {
        let status = self
            .git_ok(["status", "--porcelain=v1", "-z", "--untracked-files=all"])
            .await?;
        // With every untracked file listed, only repositories show up as directories.
        let mut nested: Vec<String> = parse_porcelain(&status)
            .into_iter()
            .filter(|s| s.change == ChangeKind::Untracked && s.path.ends_with('/'))
            .map(|s| s.path)
            .collect();

        let staged = self.git_ok(["ls-files", "-s", "-z"]).await?;
        nested.extend(parse_gitlinks(&staged).into_iter().map(|path| format!("{}/", path)));
        nested.sort();
        nested.dedup();
        Ok(nested)
    }

    /// Keeps nested repositories out of snapshots and drops any that an
    /// earlier snapshot recorded as a gitlink.
    async fn exclude_nested_repositories(&self) -> CheckpointResult<()> {
        let nested = self.nested_repositories().await?;
        if nested.is_empty() {
            return Ok(());
        }
        tracing::debug!(repositories = ?nested, "excluding nested repositories from checkpoints");

        let patterns: Vec<String> = nested
            .iter()
            .map(|path| format!("/{}", escape_exclude(path)))
            .collect();
        self.add_excludes(&patterns).await?;

        let mut args = vec!["rm", "--cached", "-r", "-q", "--ignore-unmatch", "--"];
        args.extend(nested.iter().map(|path| path.trim_end_matches('/')));
        self.git_ok(args).await.map(|_| ())
    }

    /// Appends the patterns missing from `info/exclude`.
    async fn add_excludes(&self, patterns: &[String]) -> CheckpointResult<()> {
        let info = self.git_dir.join("info");
        let path = info.join("exclude");
        let mut content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let existing: Vec<String> = content.lines().map(str::to_string).collect();
        let missing: Vec<&String> = patterns.iter().filter(|p| !existing.contains(p)).collect();
        if missing.is_empty() {
            return Ok(());
        }
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        for pattern in missing {
            content.push_str(pattern);
            content.push('\n');
        }
        tokio::fs::create_dir_all(&info).await?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    async fn has_head(&self) -> bool {
        self.git(["rev-parse", "--verify", "-q", "HEAD"])
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

/// Paths of gitlink entries in `git ls-files -s -z` output.
pub fn parse_gitlinks(output: &str) -> Vec<String> {
    output
        .split('\0')
        .filter_map(|entry| entry.strip_prefix("160000 "))
        .filter_map(|rest| rest.split_once('\t'))
        .map(|(_, path)| path.to_string())
        .collect()
}

/// Escapes glob metacharacters so a path matches itself in an exclude file.
fn escape_exclude(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        if matches!(c, '*' | '?' | '[' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Parses `git status --porcelain=v1 -z`.
pub fn parse_porcelain(output: &str) -> Vec<FileStatus> {
    let mut entries = output.split('\0').filter(|e| !e.is_empty());
    let mut statuses = Vec::new();

    while let Some(entry) = entries.next() {
        if entry.len() < 4 {
            continue;
        }
        let (code, path) = entry.split_at(3);
        let mut flags = code[..2].chars();
        let (x, y) = (flags.next().unwrap_or(' '), flags.next().unwrap_or(' '));

        let change = match (x, y) {
            ('?', '?') => ChangeKind::Untracked,
            ('R', _) | ('C', _) => {
                // Rename entries carry the original path as the next field.
                entries.next();
                ChangeKind::Renamed
            }
            ('A', _) => ChangeKind::Added,
            ('D', _) | (_, 'D') => ChangeKind::Deleted,
            _ => ChangeKind::Modified,
        };
        statuses.push(FileStatus {
            path: path.to_string(),
            change,
        });
    }
    statuses
}

#[async_trait]
impl VersionControlBackend for GitBackend {
    async fn init(&self) -> CheckpointResult<()> {
        if !self.git_dir.join("HEAD").exists() {
            tokio::fs::create_dir_all(&self.git_dir).await?;
            let output = Command::new("git")
                .env("GIT_CONFIG_NOSYSTEM", "1")
                .args(["init", "--bare", "-q"])
                .arg(&self.git_dir)
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| CheckpointError::Vcs {
                    message: format!("failed to run git: {}", e),
                })?;
            if !output.status.success() {
                return Err(CheckpointError::Vcs {
                    message: format!(
                        "git init failed: {}",
                        String::from_utf8_lossy(&output.stderr).trim()
                    ),
                });
            }
            self.git_ok(["config", "core.bare", "false"]).await?;
            tracing::debug!(git_dir = %self.git_dir.display(), "initialized checkpoint store");
        }

        self.add_excludes(&self.excludes).await
    }

    async fn status(&self) -> CheckpointResult<Vec<FileStatus>> {
        self.exclude_nested_repositories().await?;
        let output = self
            .git_ok(["status", "--porcelain=v1", "-z", "--untracked-files=all"])
            .await?;
        Ok(parse_porcelain(&output))
    }

    async fn commit(&self, message: &str) -> CheckpointResult<String> {
        self.stage_all().await?;
        self.git_ok(["commit", "-q", "--no-verify", "--allow-empty", "-m", message])
            .await?;
        Ok(self.git_ok(["rev-parse", "HEAD"]).await?.trim().to_string())
    }

    async fn pin(&self, name: &str, sha: &str) -> CheckpointResult<()> {
        self.git_ok(["update-ref", name, sha]).await.map(|_| ())
    }

    async fn diff(&self, from: &str, to: Option<&str>) -> CheckpointResult<String> {
        let base = ["diff", "--no-color", "--no-ext-diff"];
        match to {
            Some(to) => self.git_ok(base.into_iter().chain([from, to])).await,
            None => {
                self.stage_all().await?;
                self.git_ok(base.into_iter().chain(["--cached", from])).await
            }
        }
    }

    async fn checkout(&self, sha: &str) -> CheckpointResult<()> {
        // Index the current tree first so files created since `sha` are
        // known and removed by the reset.
        self.stage_all().await?;
        self.git_ok(["read-tree", "--reset", "-u", sha]).await?;
        self.git_ok(["clean", "-f", "-d", "-q"]).await?;
        Ok(())
    }

    async fn log(&self, limit: usize) -> CheckpointResult<Vec<CommitInfo>> {
        if !self.has_head().await {
            return Ok(Vec::new());
        }
        let output = self
            .git_ok([
                "log".to_string(),
                format!("-n{}", limit),
                "--format=%H%x1f%s%x1f%ct".to_string(),
            ])
            .await?;
        Ok(output
            .lines()
            .filter_map(|line| {
                let mut parts = line.split('\x1f');
                Some(CommitInfo {
                    sha: parts.next()?.to_string(),
                    subject: parts.next()?.to_string(),
                    timestamp: parts.next()?.parse().ok()?,
                })
            })
            .collect())
    }
}
