//! Tracing subscriber setup for hosts of the controller.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! left to the application (UI shell, CLI, demo).

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LogLevel;
use crate::error::{Error, Result};

/// Filter for `level`, unless `RUST_LOG` says otherwise
pub fn env_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()))
}

/// Install a global fmt subscriber filtered at `level`
///
/// # Errors
///
/// Returns [`Error::Config`] if a global subscriber is already installed.
pub fn init_tracing(level: LogLevel) -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| Error::Config {
            message: format!("could not install tracing subscriber: {}", e),
            key: Some("log_level".to_string()),
        })
}
