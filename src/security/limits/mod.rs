//! Per-process resource limits for subprocess execution.

mod rlimit;

pub use rlimit::ResourceLimits;
