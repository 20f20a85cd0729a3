//! Language tags accepted by `execute_code`.

use super::{SandboxError, SandboxResult};

/// Canonical language names, for error messages.
pub const SUPPORTED: &[&str] = &["python", "javascript", "bash", "sh", "ruby", "perl"];

/// How a snippet in one language is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interpreter {
    pub language: &'static str,
    pub program: &'static str,
    /// Flag that makes the interpreter evaluate its next argument as source.
    pub eval_flag: &'static str,
    pub image: &'static str,
}

impl Interpreter {
    /// Resolves a language tag, case-insensitively.
    pub fn for_language(tag: &str) -> SandboxResult<Self> {
        let interpreter = match tag.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Self {
                language: "python",
                program: "python3",
                eval_flag: "-c",
                image: "python:3.12-slim",
            },
            "javascript" | "js" | "node" => Self {
                language: "javascript",
                program: "node",
                eval_flag: "-e",
                image: "node:20-slim",
            },
            "bash" => Self {
                language: "bash",
                program: "bash",
                eval_flag: "-c",
                image: "bash:5",
            },
            "sh" | "shell" => Self {
                language: "sh",
                program: "sh",
                eval_flag: "-c",
                image: "alpine:3.20",
            },
            "ruby" | "rb" => Self {
                language: "ruby",
                program: "ruby",
                eval_flag: "-e",
                image: "ruby:3.3-slim",
            },
            "perl" | "pl" => Self {
                language: "perl",
                program: "perl",
                eval_flag: "-e",
                image: "perl:5-slim",
            },
            _ => return Err(SandboxError::UnsupportedLanguage(tag.to_string())),
        };
        Ok(interpreter)
    }

    /// Arguments passing `code` to the interpreter.
    pub fn args(&self, code: &str) -> Vec<String> {
        vec![self.eval_flag.to_string(), code.to_string()]
    }
}
