//! Resource limits applied in the child with `setrlimit`.

use crate::security::SecurityError;

const MB: u64 = 1024 * 1024;

/// Limits applied between `fork` and `exec` of a sandboxed subprocess.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Address-space cap in bytes (`RLIMIT_AS`, Linux only).
    pub memory_bytes: Option<u64>,
    pub cpu_seconds: Option<u64>,
    pub file_size: Option<u64>,
    pub open_files: Option<u64>,
}

impl ResourceLimits {
    pub fn none() -> Self {
        Self::default()
    }

    /// Limits derived from an execution request: the memory cap plus a CPU
    /// ceiling a little above the wall-clock timeout.
    pub fn for_execution(memory_bytes: Option<u64>, timeout_secs: u64) -> Self {
        Self {
            memory_bytes,
            cpu_seconds: Some(timeout_secs.saturating_add(5)),
            file_size: Some(512 * MB),
            open_files: Some(1024),
        }
    }

    pub fn memory(mut self, bytes: u64) -> Self {
        self.memory_bytes = Some(bytes);
        self
    }

    pub fn cpu_time(mut self, seconds: u64) -> Self {
        self.cpu_seconds = Some(seconds);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::none()
    }

    /// Applies the limits to the calling process.
    pub fn apply(&self) -> Result<(), SecurityError> {
        self.apply_raw()
            .map_err(|e| SecurityError::ResourceLimit(e.to_string()))
    }

    /// Variant for use between `fork` and `exec`: no allocation on success.
    #[cfg(unix)]
    pub fn apply_raw(&self) -> std::io::Result<()> {
        use rustix::process::{Resource, Rlimit, setrlimit};

        let set = |resource: Resource, value: Option<u64>| -> std::io::Result<()> {
            let Some(value) = value else {
                return Ok(());
            };
            // CPU keeps one second of headroom so SIGXCPU arrives before SIGKILL.
            let maximum = match resource {
                Resource::Cpu => value.saturating_add(1),
                _ => value,
            };
            let rlim = Rlimit {
                current: Some(value),
                maximum: Some(maximum),
            };
            setrlimit(resource, rlim)
                .map_err(|e| std::io::Error::from_raw_os_error(e.raw_os_error()))
        };

        #[cfg(target_os = "linux")]
        set(Resource::As, self.memory_bytes)?;
        set(Resource::Cpu, self.cpu_seconds)?;
        set(Resource::Fsize, self.file_size)?;
        set(Resource::Nofile, self.open_files)?;

        Ok(())
    }

    #[cfg(not(unix))]
    pub fn apply_raw(&self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_is_empty() {
        assert!(ResourceLimits::none().is_empty());
        assert!(!ResourceLimits::none().memory(64 * MB).is_empty());
    }

    #[test]
    fn test_for_execution() {
        let limits = ResourceLimits::for_execution(Some(256 * MB), 30);
        assert_eq!(limits.memory_bytes, Some(256 * MB));
        assert_eq!(limits.cpu_seconds, Some(35));
    }

    #[test]
    fn test_builder() {
        let limits = ResourceLimits::none().memory(MB).cpu_time(10);
        assert_eq!(limits.memory_bytes, Some(MB));
        assert_eq!(limits.cpu_seconds, Some(10));
        assert!(limits.file_size.is_none());
    }
}
