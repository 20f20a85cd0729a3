//! Structured span definitions for tracing.

use std::time::Instant;
use tracing::{Level, Span, field, span};

use crate::sandbox::ExecutionResult;

/// Span around one sandboxed execution, filled in when it finishes.
pub struct ExecutionSpan {
    span: Span,
    start: Instant,
}

impl ExecutionSpan {
    pub fn new(backend: &str, program: &str) -> Self {
        let span = span!(
            Level::INFO,
            "sandbox.execute",
            backend = backend,
            program = program,
            exit_code = field::Empty,
            timed_out = field::Empty,
            oom_killed = field::Empty,
            duration_ms = field::Empty,
        );
        Self {
            span,
            start: Instant::now(),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn finish(self, result: &ExecutionResult) {
        let duration_ms = self.start.elapsed().as_millis() as u64;
        self.span.record("exit_code", result.exit_code);
        self.span.record("timed_out", result.timed_out);
        self.span.record("oom_killed", result.oom_killed);
        self.span.record("duration_ms", duration_ms);
        if result.oom_killed {
            self.span.in_scope(|| tracing::warn!(duration_ms, "execution killed for exceeding its memory limit"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_span_finish() {
        let span = ExecutionSpan::new("subprocess", "echo");
        span.finish(&ExecutionResult {
            exit_code: 137,
            oom_killed: true,
            ..Default::default()
        });
    }
}
