//! Logging setup
//!
//! Log lines go to stderr so stdout stays free for the JSON payload stream.
//! `RUST_LOG` takes precedence over the configured level.

use std::io;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Build the filter from `RUST_LOG`, falling back to `default_level`
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// Returns an error if a global subscriber is already set.
pub fn init_logging(default_level: &str) -> Result<(), tracing_subscriber::util::TryInitError> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false);

    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(stderr_layer)
        .try_init()
}
