//! # KG Telemetry
//!
//! Logging and metrics plumbing for the repository core.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kg_telemetry::{init_tracing, RepositoryMetrics, TelemetryConfig};
//!
//! let _guard = init_tracing(&TelemetryConfig::from_env())?;
//! let registry = prometheus::Registry::new();
//! let metrics = RepositoryMetrics::register(&registry)?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `KG_SERVICE_NAME` | `kg-repository` | Service name in logs |
//! | `KG_LOG_LEVEL` | `info` | Log level filter |
//! | `KG_JSON_LOGS` | `false` | JSON formatted output |

mod config;
mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::{encode_text, Outcome, RepositoryMetrics};
pub use tracing_setup::{build_env_filter, init_tracing, TracingGuard};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Tracing subscriber already initialized: {0}")]
    AlreadyInitialized(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
