//! Tracing subscriber setup for embedding processes and tests.

use tracing_subscriber::{EnvFilter, fmt};

/// Initialize a console subscriber with an env-controlled filter.
///
/// Uses `try_init` so repeated calls (tests, multiple embedders) are a no-op
/// instead of a panic.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("townkeeper=info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}
