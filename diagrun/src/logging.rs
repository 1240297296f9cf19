//! Tracing setup for the diagrun binary.
//!
//! Diagnostics go to stderr through `tracing`. POD output never passes through
//! here: each POD's stdout/stderr lands in its own log file in the POD
//! working directory (see [`crate::io::process`]).

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `info` so dropped case entries, unknown POD
/// tokens, and per-POD results are visible without extra flags.
///
/// # Example
/// ```bash
/// RUST_LOG=diagrun=debug diagrun run --pods all
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
