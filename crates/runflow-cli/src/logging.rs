//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! The filter comes from `RUST_LOG` and defaults to `warn`. Logs go to
//! stderr so that stdout stays reserved for streamed run output.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

/// Initialises the global logging subscriber.
///
/// Safe to call once at startup.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
