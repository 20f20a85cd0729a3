//! Shell command security analysis using tree-sitter AST parsing.

mod env;
mod parser;

pub use env::SanitizedEnv;
pub use parser::{
    BashAnalyzer, CommandAnalysis, CommandSegment, ExecChain, Redirect, RedirectKind,
    StructuralViolation, normalize_whitespace,
};
