//! Structured logging with `tracing`.
//!
//! - [`init_subscriber`] installs the process-wide subscriber
//! - [`test_utils::capture_logs`] captures events for assertions in tests
//!
//! Events carry structured fields (`conn_id`, `topic`, `method`, `relay`)
//! rather than interpolated strings so JSON output stays queryable.

pub mod test_utils;

pub use test_utils::{CapturedLogs, capture_logs};

/// Initialize the global tracing subscriber on stderr.
///
/// `RUST_LOG` takes precedence over `level` when set. With `json` the
/// output is one JSON object per line, otherwise the compact human format.
/// Subsequent calls are no-ops.
pub fn init_subscriber(level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .json()
            .flatten_event(true);
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact();
        // set_global_default is a no-op if already set
        let _ = subscriber.try_init();
    }
}

