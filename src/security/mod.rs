//! Security primitives shared by the permission layer and the sandbox.
//!
//! - AST-based shell command analysis with structural denials
//! - Environment variable sanitization for spawned processes
//! - Process resource limits via `setrlimit`
//! - Lexical path normalization

pub mod bash;
pub mod limits;
pub mod path;

mod error;

pub use bash::{
    BashAnalyzer, CommandAnalysis, Redirect, RedirectKind, SanitizedEnv, StructuralViolation,
};
pub use error::SecurityError;
pub use limits::ResourceLimits;
pub use path::{normalize_path, resolve_against};
