//! Tracing subscriber setup.
//!
//! Installs a global `tracing` subscriber with an env filter and either a
//! human-readable or a JSON formatter.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{TelemetryConfig, TelemetryError};

/// Returned by [`init_tracing`]; logs a final line on drop.
pub struct TracingGuard {
    service_name: String,
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        tracing::debug!(service = %self.service_name, "Tracing guard dropped");
    }
}

/// Build the env filter from `RUST_LOG` or the configured level.
pub fn build_env_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| TelemetryError::Config(e.to_string()))
}

/// Install the global subscriber.
///
/// Fails with `AlreadyInitialized` if another subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> Result<TracingGuard, TelemetryError> {
    let env_filter = build_env_filter(config)?;

    let result = if config.json_logs {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(config.with_source_location)
            .with_line_number(config.with_source_location);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .try_init()
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(config.with_source_location)
            .with_line_number(config.with_source_location)
            .with_ansi(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
    };

    result.map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        json = config.json_logs,
        "Tracing initialized"
    );

    Ok(TracingGuard {
        service_name: config.service_name.clone(),
    })
}
