//! Log output for binaries built on Wyvern.
//!
//! Library code only emits `tracing` events. Installing a subscriber is
//! the application's call, usually once at the top of `main`.

use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (e.g. `"info,wyvern=debug"`).
///
/// Returns `false` if a global subscriber was already set.
pub fn init(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
