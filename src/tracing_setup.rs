//! Tracing subscriber initialization
//!
//! The engine logs through `tracing` macros everywhere; embedding hosts that
//! already install a subscriber can skip this module entirely.
//!
//! Configuration via environment variables:
//! - `RUST_LOG`: level filter (default: `info`)

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize a plain fmt subscriber with env-driven filtering
///
/// Safe to call once per process; returns an error string if a global
/// subscriber is already installed.
pub fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()?;

    Ok(())
}

/// Best-effort init for tests and examples: ignores double-install errors.
pub fn init_tracing_for_tests() {
    let _ = init_tracing();
}
