//! Permission gating for file and shell operations.
//!
//! A [`PolicyStore`] holds the merged global and project rules; a
//! [`PermissionManager`] answers per-operation questions against that
//! snapshot. Authorization and human approval are separate stages: a decision
//! can be `allowed` and still carry `requires_approval`.

mod manager;
mod rules;
mod store;

pub use manager::PermissionManager;
pub use rules::{
    Capability, GlobalPermissions, PermissionDecision, PermissionRule, PolicyOverlay,
    evaluate_command, evaluate_path,
};
pub use store::PolicyStore;

use std::path::PathBuf;

pub const READ_FILE_TOOL: &str = "read_file";
pub const WRITE_FILE_TOOL: &str = "write_file";
pub const EDIT_FILE_TOOL: &str = "edit_file";
pub const DELETE_FILE_TOOL: &str = "delete_file";
pub const EXECUTE_COMMAND_TOOL: &str = "execute_command";
pub const EXECUTE_CODE_TOOL: &str = "execute_code";

pub const FILE_MUTATING_TOOLS: &[&str] = &[WRITE_FILE_TOOL, EDIT_FILE_TOOL, DELETE_FILE_TOOL];
pub const SHELL_TOOLS: &[&str] = &[EXECUTE_COMMAND_TOOL, EXECUTE_CODE_TOOL];

pub fn is_file_mutating_tool(tool_name: &str) -> bool {
    FILE_MUTATING_TOOLS.contains(&tool_name)
}

pub fn is_shell_tool(tool_name: &str) -> bool {
    SHELL_TOOLS.contains(&tool_name)
}

/// Capability a tool is checked against, if any.
pub fn capability_for_tool(tool_name: &str) -> Option<Capability> {
    match tool_name {
        READ_FILE_TOOL => Some(Capability::FileRead),
        t if is_file_mutating_tool(t) => Some(Capability::FileWrite),
        t if is_shell_tool(t) => Some(Capability::ShellExecute),
        _ => None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error("Denied by policy: {reason}")]
    DeniedByPolicy { reason: String },

    #[error("Tool '{tool}' requires approval")]
    ApprovalRequired { tool: String },

    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Failed to load policy from {path}: {message}")]
    Load { path: PathBuf, message: String },
}

pub type PermissionResult<T> = std::result::Result<T, PermissionError>;
