//! Logging setup and structured spans.
//!
//! The crate only emits `tracing` events. Binaries that want them printed
//! call [`init_logging`] (behind the default `logging` feature):
//!
//! ```rust,no_run
//! coding_agent_core::observability::init_logging("info");
//! ```

mod spans;

pub use spans::ExecutionSpan;

/// Installs a fmt subscriber filtered at `level`. `RUST_LOG` takes
/// precedence when set. Returns `false` if a global subscriber already
/// exists.
#[cfg(feature = "logging")]
pub fn init_logging(level: &str) -> bool {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    #[cfg(feature = "logging")]
    #[test]
    fn test_init_logging_twice() {
        let _first = super::init_logging("debug");
        assert!(!super::init_logging("info"));
    }
}
