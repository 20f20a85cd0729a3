//! Prelude module for convenient imports.
//!
//! ```rust
//! use coding_agent_core::prelude::*;
//! ```

pub use crate::Error;
pub use crate::Result;

// Execution
pub use crate::sandbox::{
    ExecutionOptions, ExecutionResult, SandboxConfig, SandboxExecutor, SandboxMode,
};

// Permissions
pub use crate::permissions::{
    Capability, EXECUTE_CODE_TOOL, EXECUTE_COMMAND_TOOL, GlobalPermissions, PermissionDecision,
    PermissionManager, PolicyStore, READ_FILE_TOOL, WRITE_FILE_TOOL,
};

// Sessions
pub use crate::session::{
    CreateSessionOptions, GetOrCreateOptions, MessageQuery, NewMessage, Role, SessionManager,
};

// Checkpoints
pub use crate::checkpoint::CheckpointManager;

// Configuration
pub use crate::config::{ConfigManager, Settings};
