//! # Observability
//!
//! Structured logging for the vaultline engine via the tracing ecosystem.
//! Filtering follows `RUST_LOG` (falling back to `info`); set
//! `VAULTLINE_LOG_FORMAT=json` for machine-readable output.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// Safe to call once per process; returns quietly if a subscriber is
/// already installed (useful under `cargo test`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("VAULTLINE_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let result = if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
