//! Permission rules and pure policy evaluation.
//!
//! Evaluation never mutates the rule set: callers pass the merged
//! [`GlobalPermissions`] and get a [`PermissionDecision`] back. Deny patterns
//! are consulted before allow patterns, and a path or command with no allow
//! match is rejected.

use std::path::Path;

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use super::{DELETE_FILE_TOOL, EXECUTE_COMMAND_TOOL, PermissionError, WRITE_FILE_TOOL};
use crate::security::bash::CommandSegment;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Operation class a rule set applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    FileRead,
    FileWrite,
    ShellExecute,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FileRead => write!(f, "file-read"),
            Self::FileWrite => write!(f, "file-write"),
            Self::ShellExecute => write!(f, "shell-execute"),
        }
    }
}

/// Allow and deny glob sets for one capability.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRule {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

impl PermissionRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, pattern: impl Into<String>) -> Self {
        self.allow.push(pattern.into());
        self
    }

    pub fn deny(mut self, pattern: impl Into<String>) -> Self {
        self.deny.push(pattern.into());
        self
    }

    fn from_slices(allow: &[&str], deny: &[&str]) -> Self {
        Self {
            allow: allow.iter().map(|s| s.to_string()).collect(),
            deny: deny.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Set union with `other`; patterns keep first-seen order.
    pub fn merged_with(&self, other: &PermissionRule) -> PermissionRule {
        PermissionRule {
            allow: union(&self.allow, &other.allow),
            deny: union(&self.deny, &other.deny),
        }
    }

    pub fn validate(&self) -> Result<(), PermissionError> {
        for pattern in self.allow.iter().chain(&self.deny) {
            Pattern::new(glob_body(pattern)).map_err(|e| PermissionError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.msg.to_string(),
            })?;
        }
        Ok(())
    }
}

fn union(a: &[String], b: &[String]) -> Vec<String> {
    let mut out = a.to_vec();
    for item in b {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

/// Rules for every capability plus the tools that need human confirmation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GlobalPermissions {
    pub file_read: PermissionRule,
    pub file_write: PermissionRule,
    pub shell_execute: PermissionRule,
    pub require_approval: Vec<String>,
}

impl Default for GlobalPermissions {
    fn default() -> Self {
        let secrets = ["**/.env*", "**/*.pem", "**/*.key", "**/.ssh/**", "**/.aws/**"];
        let mut write_deny = secrets.to_vec();
        write_deny.extend(["**/.git/**", "**/.coding-agent/**"]);

        Self {
            file_read: PermissionRule::from_slices(&["./**/*"], &secrets),
            file_write: PermissionRule::from_slices(&["./**/*"], &write_deny),
            shell_execute: PermissionRule::from_slices(
                &[
                    "git *", "ls", "ls *", "pwd", "cat *", "echo *", "head *", "tail *", "wc *",
                    "grep *", "rg *", "find *", "diff *", "sort *", "which *", "mkdir *",
                    "touch *", "cp *", "mv *", "npm *", "npx *", "node *", "yarn *", "pnpm *",
                    "cargo *", "rustc *", "python *", "python3 *", "pip *", "pytest*", "go *",
                    "make", "make *", "tsc*", "jest*", "eslint*", "prettier*",
                ],
                &[
                    "rm -rf *",
                    "rm -fr *",
                    "git push --force*",
                    "git push -f*",
                    "git reset --hard*",
                    "git clean -f*",
                    "chmod 777 *",
                    "curl *",
                    "wget *",
                    "dd *",
                ],
            ),
            require_approval: vec![
                WRITE_FILE_TOOL.to_string(),
                DELETE_FILE_TOOL.to_string(),
                EXECUTE_COMMAND_TOOL.to_string(),
            ],
        }
    }
}

impl GlobalPermissions {
    /// Rules with nothing allowed; useful as a base for explicit policies.
    pub fn empty() -> Self {
        Self {
            file_read: PermissionRule::default(),
            file_write: PermissionRule::default(),
            shell_execute: PermissionRule::default(),
            require_approval: Vec::new(),
        }
    }

    pub fn rule(&self, capability: Capability) -> &PermissionRule {
        match capability {
            Capability::FileRead => &self.file_read,
            Capability::FileWrite => &self.file_write,
            Capability::ShellExecute => &self.shell_execute,
        }
    }

    /// Layers project rules on top. Allow and deny sets are unioned, so a
    /// project can add denies but never remove one.
    pub fn merge(&self, project: &PolicyOverlay) -> GlobalPermissions {
        GlobalPermissions {
            file_read: self.file_read.merged_with(&project.file_read),
            file_write: self.file_write.merged_with(&project.file_write),
            shell_execute: self.shell_execute.merged_with(&project.shell_execute),
            require_approval: union(&self.require_approval, &project.require_approval),
        }
    }

    pub fn requires_approval(&self, tool_name: &str) -> bool {
        self.require_approval.iter().any(|t| t == tool_name)
    }

    pub fn validate(&self) -> Result<(), PermissionError> {
        self.file_read.validate()?;
        self.file_write.validate()?;
        self.shell_execute.validate()
    }
}

/// Project-level additions to the global policy.
///
/// Unlike [`GlobalPermissions`], a capability the file leaves out contributes
/// no patterns, so the built-in allow lists never leak in through a project
/// file that only mentions another capability.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicyOverlay {
    pub file_read: PermissionRule,
    pub file_write: PermissionRule,
    pub shell_execute: PermissionRule,
    pub require_approval: Vec<String>,
}

impl PolicyOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), PermissionError> {
        self.file_read.validate()?;
        self.file_write.validate()?;
        self.shell_execute.validate()
    }
}

/// Outcome of a permission check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    /// Set when the operation is permitted but a human must confirm it first.
    pub requires_approval: bool,
}

impl PermissionDecision {
    pub fn allowed(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: Some(reason.into()),
            requires_approval: false,
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            requires_approval: false,
        }
    }

    pub fn with_approval(mut self, required: bool) -> Self {
        self.requires_approval = self.allowed && required;
        self
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    pub fn is_denied(&self) -> bool {
        !self.allowed
    }

    /// Converts to a `Result` for callers that abort on anything but an
    /// unconditional allow.
    pub fn into_result(self, tool_name: &str) -> Result<(), PermissionError> {
        if !self.allowed {
            return Err(PermissionError::DeniedByPolicy {
                reason: self.reason.unwrap_or_else(|| "denied".to_string()),
            });
        }
        if self.requires_approval {
            return Err(PermissionError::ApprovalRequired {
                tool: tool_name.to_string(),
            });
        }
        Ok(())
    }
}

/// `./src/**` and `src/**` are the same pattern relative to the working dir.
fn glob_body(pattern: &str) -> &str {
    pattern.strip_prefix("./").unwrap_or(pattern)
}

fn glob_matches(pattern: &str, candidate: &str) -> bool {
    let Ok(compiled) = Pattern::new(pattern) else {
        return pattern == candidate;
    };
    if compiled.matches_with(candidate, MATCH_OPTIONS) {
        return true;
    }
    // `**/x` also names `x` at the top level.
    pattern
        .strip_prefix("**/")
        .is_some_and(|rest| glob_matches(rest, candidate))
}

/// Tests one pattern against a normalized absolute path.
fn path_matches(pattern: &str, path: &Path, working_dir: &Path) -> bool {
    let absolute = path.to_string_lossy();
    let relative = path
        .strip_prefix(working_dir)
        .ok()
        .map(|p| p.to_string_lossy().into_owned())
        .filter(|p| !p.is_empty());

    if pattern.starts_with("./") {
        return relative
            .as_deref()
            .is_some_and(|rel| glob_matches(glob_body(pattern), rel));
    }

    if pattern.starts_with('/') || pattern.starts_with('~') {
        let anchored = crate::security::resolve_against(working_dir, pattern);
        return glob_matches(&anchored.to_string_lossy(), &absolute);
    }

    relative
        .as_deref()
        .is_some_and(|rel| glob_matches(pattern, rel))
        || glob_matches(pattern, absolute.trim_start_matches('/'))
}

/// Evaluates a normalized absolute path against one capability's rule.
pub fn evaluate_path(
    rule: &PermissionRule,
    capability: Capability,
    path: &Path,
    working_dir: &Path,
) -> PermissionDecision {
    if let Some(pattern) = rule
        .deny
        .iter()
        .find(|p| path_matches(p, path, working_dir))
    {
        return PermissionDecision::denied(format!(
            "{} denied for {}: matches deny pattern '{}'",
            capability,
            path.display(),
            pattern
        ));
    }

    match rule
        .allow
        .iter()
        .find(|p| path_matches(p, path, working_dir))
    {
        Some(pattern) => PermissionDecision::allowed(format!(
            "{} allowed by pattern '{}'",
            capability, pattern
        )),
        None => PermissionDecision::denied(format!(
            "{} denied for {}: no allow pattern matches",
            capability,
            path.display()
        )),
    }
}

fn command_matches(pattern: &str, text: &str, name: Option<&str>) -> bool {
    let pattern = pattern.trim();
    if text == pattern || glob_matches(pattern, text) {
        return true;
    }
    // A bare word names the program regardless of its arguments.
    !pattern.contains([' ', '*', '?', '['])
        && name.is_some_and(|n| n == pattern)
}

/// Evaluates a whitespace-normalized command line and its segments.
///
/// Deny patterns are tested against the whole line and every segment; allow
/// requires every segment to match some allow pattern.
pub fn evaluate_command(
    rule: &PermissionRule,
    command_line: &str,
    segments: &[CommandSegment],
) -> PermissionDecision {
    let deny_hit = rule.deny.iter().find(|p| {
        command_matches(p, command_line, None)
            || segments
                .iter()
                .any(|s| command_matches(p, &s.text, Some(&s.name)))
    });
    if let Some(pattern) = deny_hit {
        return PermissionDecision::denied(format!(
            "command '{}' matches deny pattern '{}'",
            command_line, pattern
        ));
    }

    if segments.len() <= 1 {
        let name = segments.first().map(|s| s.name.as_str());
        return match rule
            .allow
            .iter()
            .find(|p| command_matches(p, command_line, name))
        {
            Some(pattern) => {
                PermissionDecision::allowed(format!("command allowed by pattern '{}'", pattern))
            }
            None => PermissionDecision::denied(format!(
                "command '{}' not in allow list",
                command_line
            )),
        };
    }

    for segment in segments {
        if !rule
            .allow
            .iter()
            .any(|p| command_matches(p, &segment.text, Some(&segment.name)))
        {
            return PermissionDecision::denied(format!(
                "command segment '{}' not in allow list",
                segment.text
            ));
        }
    }
    PermissionDecision::allowed("every command segment is allow-listed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn wd() -> PathBuf {
        PathBuf::from("/work/project")
    }

    fn read_rule() -> PermissionRule {
        PermissionRule::new().allow("./**/*").deny("**/.env*")
    }

    #[test]
    fn test_deny_wins_over_allow() {
        let rule = read_rule();
        for path in ["/work/project/.env", "/work/project/config/.env.local"] {
            let decision = evaluate_path(&rule, Capability::FileRead, Path::new(path), &wd());
            assert!(decision.is_denied(), "{path} should be denied");
            assert!(decision.reason.unwrap().contains("**/.env*"));
        }
    }

    #[test]
    fn test_allow_inside_working_dir() {
        let decision = evaluate_path(
            &read_rule(),
            Capability::FileRead,
            Path::new("/work/project/src/main.rs"),
            &wd(),
        );
        assert!(decision.is_allowed());
    }

    #[test]
    fn test_default_deny_outside_working_dir() {
        let decision = evaluate_path(
            &read_rule(),
            Capability::FileRead,
            Path::new("/etc/passwd"),
            &wd(),
        );
        assert!(decision.is_denied());
        assert!(decision.reason.unwrap().contains("no allow pattern"));
    }

    #[test]
    fn test_absolute_patterns() {
        let rule = PermissionRule::new().allow("/tmp/**");
        assert!(
            evaluate_path(&rule, Capability::FileWrite, Path::new("/tmp/a/b.txt"), &wd())
                .is_allowed()
        );
    }

    #[test]
    fn test_merge_never_weakens_deny() {
        let global = GlobalPermissions::empty();
        let mut global = global;
        global.file_write = PermissionRule::new().allow("./**/*").deny("**/.git/**");
        let mut project = PolicyOverlay::new();
        project.file_write = PermissionRule::new().allow("**/*");
        project.require_approval = vec!["custom_tool".into()];

        let merged = global.merge(&project);
        assert_eq!(merged.file_write.deny, vec!["**/.git/**".to_string()]);
        assert_eq!(merged.file_write.allow.len(), 2);
        assert!(merged.requires_approval("custom_tool"));

        let decision = evaluate_path(
            &merged.file_write,
            Capability::FileWrite,
            Path::new("/work/project/.git/config"),
            &wd(),
        );
        assert!(decision.is_denied());
    }

    #[test]
    fn test_overlay_leaves_missing_capabilities_empty() {
        let overlay: PolicyOverlay =
            serde_json::from_str(r#"{"fileRead": {"deny": ["**/secrets/**"]}}"#).unwrap();
        assert!(overlay.shell_execute.allow.is_empty());
        assert!(overlay.file_write.allow.is_empty());
        assert!(overlay.require_approval.is_empty());

        let mut global = GlobalPermissions::empty();
        global.shell_execute = PermissionRule::new().allow("git *");
        let merged = global.merge(&overlay);
        assert_eq!(merged.shell_execute.allow, vec!["git *".to_string()]);
        assert_eq!(merged.file_read.deny, vec!["**/secrets/**".to_string()]);
    }

    fn segment(name: &str, text: &str) -> CommandSegment {
        CommandSegment {
            name: name.into(),
            args: Vec::new(),
            text: text.into(),
        }
    }

    #[test]
    fn test_command_allow_and_deny() {
        let rule = PermissionRule::new()
            .allow("git *")
            .allow("ls")
            .deny("git push --force*");

        let status = [segment("git", "git status")];
        assert!(evaluate_command(&rule, "git status", &status).is_allowed());

        let ls = [segment("ls", "ls -la")];
        assert!(evaluate_command(&rule, "ls -la", &ls).is_allowed());

        let push = [segment("git", "git push --force origin main")];
        assert!(evaluate_command(&rule, "git push --force origin main", &push).is_denied());

        let other = [segment("make", "make build")];
        assert!(evaluate_command(&rule, "make build", &other).is_denied());
    }

    #[test]
    fn test_every_segment_must_be_allowed() {
        let rule = PermissionRule::new().allow("git *").allow("cargo *");
        let ok = [segment("git", "git add ."), segment("cargo", "cargo test")];
        assert!(evaluate_command(&rule, "git add . && cargo test", &ok).is_allowed());

        let mixed = [segment("git", "git add ."), segment("make", "make")];
        let decision = evaluate_command(&rule, "git add . && make", &mixed);
        assert!(decision.is_denied());
        assert!(decision.reason.unwrap().contains("make"));
    }

    #[test]
    fn test_decision_into_result() {
        let denied = PermissionDecision::denied("nope");
        assert!(matches!(
            denied.into_result("read_file"),
            Err(PermissionError::DeniedByPolicy { .. })
        ));

        let gated = PermissionDecision::allowed("ok").with_approval(true);
        assert!(matches!(
            gated.into_result("execute_command"),
            Err(PermissionError::ApprovalRequired { .. })
        ));

        let denied_gated = PermissionDecision::denied("no").with_approval(true);
        assert!(!denied_gated.requires_approval);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let rule = PermissionRule::new().allow("[unclosed");
        assert!(matches!(
            rule.validate(),
            Err(PermissionError::InvalidPattern { .. })
        ));
    }
}
