//! Tracing bootstrap for hosts embedding the session client

use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a JSON tracing subscriber filtered by `LOG_LEVEL` or `RUST_LOG`
/// (default `info`).
///
/// Returns false when a global subscriber was already installed; the existing
/// one is left in place.
pub fn init_tracing() -> bool {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
        .is_ok()
}
