//! Tracing setup shared by all four binaries, factored out of the
//! per-binary `main.rs` so every process logs the same way.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs a global `tracing` subscriber: env-filtered (`RUST_LOG`,
/// defaulting to `info`) with the compact text formatter.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}
