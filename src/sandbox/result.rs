use serde::{Deserialize, Serialize};

use super::ExecutionError;

/// Exit code reported when the unit could not be created or started.
pub const SETUP_FAILURE_EXIT_CODE: i32 = -1;

/// Outcome of one `execute` call. Produced exactly once per call; failures are
/// encoded here rather than returned as errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub oom_killed: bool,
}

impl ExecutionResult {
    /// Result for an infrastructure failure before the unit ran.
    pub fn setup_failure(description: impl Into<String>) -> Self {
        Self {
            exit_code: SETUP_FAILURE_EXIT_CODE,
            stderr: description.into(),
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out && !self.oom_killed
    }

    /// Most significant failure class, if any. Timeout outranks OOM when both
    /// flags are set.
    pub fn error(&self) -> Option<ExecutionError> {
        if self.timed_out {
            Some(ExecutionError::Timeout)
        } else if self.oom_killed {
            Some(ExecutionError::OomKilled)
        } else if self.exit_code == SETUP_FAILURE_EXIT_CODE {
            Some(ExecutionError::ContainerUnavailable)
        } else if self.exit_code != 0 {
            Some(ExecutionError::NonZeroExit(self.exit_code))
        } else {
            None
        }
    }

    /// Stdout followed by stderr, separated when both are present.
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n--- stderr ---\n{}", self.stdout, self.stderr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_failure_shape() {
        let result = ExecutionResult::setup_failure("docker: not found");
        assert_eq!(result.exit_code, -1);
        assert_eq!(result.stderr, "docker: not found");
        assert!(!result.timed_out);
        assert!(!result.oom_killed);
        assert_eq!(result.error(), Some(ExecutionError::ContainerUnavailable));
    }

    #[test]
    fn test_error_classification() {
        let ok = ExecutionResult::default();
        assert!(ok.success());
        assert_eq!(ok.error(), None);

        let oom = ExecutionResult {
            exit_code: 137,
            oom_killed: true,
            ..Default::default()
        };
        assert_eq!(oom.error(), Some(ExecutionError::OomKilled));

        let failed = ExecutionResult {
            exit_code: 2,
            ..Default::default()
        };
        assert_eq!(failed.error(), Some(ExecutionError::NonZeroExit(2)));
    }

    #[test]
    fn test_combined_output() {
        let result = ExecutionResult {
            stdout: "out".into(),
            stderr: "err".into(),
            ..Default::default()
        };
        assert_eq!(result.combined_output(), "out\n--- stderr ---\nerr");
    }
}
