//! Per-operation permission checks against a merged policy snapshot.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{
    Capability, EXECUTE_COMMAND_TOOL, GlobalPermissions, PermissionDecision, PolicyStore,
    WRITE_FILE_TOOL, evaluate_command, evaluate_path,
};
use crate::security::{BashAnalyzer, Redirect, RedirectKind, normalize_path, resolve_against};

/// Answers whether a file or command operation may proceed.
///
/// Holds an immutable policy snapshot; cloning is cheap.
#[derive(Clone, Debug)]
pub struct PermissionManager {
    policy: Arc<GlobalPermissions>,
    working_dir: PathBuf,
    analyzer: BashAnalyzer,
}

impl PermissionManager {
    pub fn new(policy: GlobalPermissions, working_dir: impl AsRef<Path>) -> Self {
        Self {
            policy: Arc::new(policy),
            working_dir: normalize_path(working_dir.as_ref()),
            analyzer: BashAnalyzer::new(),
        }
    }

    pub fn from_store(store: &PolicyStore, working_dir: impl AsRef<Path>) -> Self {
        Self::new(store.merged().clone(), working_dir)
    }

    pub fn policy(&self) -> &GlobalPermissions {
        &self.policy
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn can_read_file(&self, path: impl AsRef<Path>) -> PermissionDecision {
        self.check_path(Capability::FileRead, path.as_ref())
    }

    /// Write checks also report whether the write tool needs confirmation.
    pub fn can_write_file(&self, path: impl AsRef<Path>) -> PermissionDecision {
        self.check_path(Capability::FileWrite, path.as_ref())
            .with_approval(self.tool_requires_approval(WRITE_FILE_TOOL))
    }

    pub fn can_execute_command(&self, command_line: &str) -> PermissionDecision {
        let analysis = self.analyzer.analyze(command_line);
        let normalized = crate::security::bash::normalize_whitespace(command_line);

        if normalized.is_empty() {
            return PermissionDecision::denied("empty command");
        }

        if let Some(violation) = analysis.violations.first() {
            tracing::warn!(command = %normalized, %violation, "Command structurally denied");
            return PermissionDecision::denied(format!("always denied: {}", violation));
        }

        if let Some(denied) = analysis
            .redirects
            .iter()
            .find_map(|redirect| self.check_redirect(redirect))
        {
            tracing::info!(
                command = %normalized,
                reason = denied.reason.as_deref().unwrap_or_default(),
                "Command redirect denied"
            );
            return denied;
        }

        let decision = evaluate_command(&self.policy.shell_execute, &normalized, &analysis.segments);
        if decision.is_denied() {
            tracing::info!(
                command = %normalized,
                reason = decision.reason.as_deref().unwrap_or_default(),
                "Command denied by policy"
            );
        }
        decision.with_approval(self.tool_requires_approval(EXECUTE_COMMAND_TOOL))
    }

    pub fn tool_requires_approval(&self, tool_name: &str) -> bool {
        self.policy.requires_approval(tool_name)
    }

    /// Redirect targets go through the same path rules as the file tools.
    /// Returns the denial, if any.
    fn check_redirect(&self, redirect: &Redirect) -> Option<PermissionDecision> {
        if redirect.is_standard_stream() {
            return None;
        }
        if redirect.is_dynamic() {
            return Some(PermissionDecision::denied(format!(
                "redirect target '{}' cannot be resolved before execution",
                redirect.target
            )));
        }
        let (capability, verb) = match redirect.kind {
            RedirectKind::Read => (Capability::FileRead, "from"),
            RedirectKind::Write => (Capability::FileWrite, "to"),
        };
        let decision = self.check_path(capability, Path::new(&redirect.target));
        decision.is_denied().then(|| {
            PermissionDecision::denied(format!(
                "redirect {} '{}': {}",
                verb,
                redirect.target,
                decision.reason.as_deref().unwrap_or("denied")
            ))
        })
    }

    fn check_path(&self, capability: Capability, path: &Path) -> PermissionDecision {
        let resolved = resolve_against(&self.working_dir, path);
        let decision = evaluate_path(
            self.policy.rule(capability),
            capability,
            &resolved,
            &self.working_dir,
        );
        if decision.is_denied() {
            tracing::info!(
                %capability,
                path = %resolved.display(),
                reason = decision.reason.as_deref().unwrap_or_default(),
                "Path denied by policy"
            );
        }
        decision
    }
}
