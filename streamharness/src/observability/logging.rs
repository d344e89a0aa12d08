//! Subscriber setup for test runs.
//!
//! Every installer uses `try_init`, so tests can call them freely; only
//! the first call in a process takes effect.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "streamharness=info";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs a human-readable subscriber writing through the test harness.
///
/// Honors `RUST_LOG`; defaults to `streamharness=info`.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_test_writer()
        .with_target(true)
        .try_init();
}

/// Installs a JSON subscriber writing to stderr.
pub fn init_json_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(std::io::stderr)
        .json()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_repeatable() {
        init_test_logging();
        init_test_logging();
        init_json_logging();
    }

    #[test]
    fn test_default_filter_parses() {
        let filter = EnvFilter::new(DEFAULT_FILTER);
        assert!(format!("{filter:?}").contains("streamharness"));
    }
}
