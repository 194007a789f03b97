//! Logging utilities for the server registry components.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Build the filter from RUST_LOG, falling back to `default_level`.
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize tracing with the given default level, optionally as JSON lines.
///
/// The RUST_LOG environment variable overrides `default_level`.
pub fn init_with(default_level: &str, json: bool) {
    let registry = tracing_subscriber::registry().with(env_filter(default_level));
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
