//! Structured logging setup.
//!
//! The library only emits `tracing` events; installing a subscriber is up to
//! the binary. [`init_logging`] is the stock one: console output filtered by
//! [`LoggingConfig::level`], overridable through `RUST_LOG`.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, LoggingConfig};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Install a global subscriber. Safe to call more than once; only the first
/// call has an effect, and an already installed subscriber is left alone.
pub fn init_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.level))
            .unwrap_or_else(|_| EnvFilter::new("error"));

        let result = match config.format {
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true))
                .try_init(),
            LogFormat::Json => tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_target(true))
                .try_init(),
        };

        if result.is_err() {
            tracing::debug!("global tracing subscriber already installed");
        }
    });
}
