//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber, writing to stderr.
///
/// `RUST_LOG` wins over `level` when set. With `json` the output is one JSON
/// object per line, otherwise the compact human format. Subsequent calls are
/// no-ops.
pub fn init_subscriber(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // try_init fails if a global subscriber is already set
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}
