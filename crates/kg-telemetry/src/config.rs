//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for logging output.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to every log line
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error) or full `EnvFilter` directive
    pub log_level: String,

    /// Whether to enable JSON formatted logs
    pub json_logs: bool,

    /// Include file and line numbers
    pub with_source_location: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "kg-repository".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            with_source_location: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `KG_SERVICE_NAME`: Service name (default: kg-repository)
    /// - `KG_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `KG_JSON_LOGS`: Enable JSON logs (default: false, true in containers)
    /// - `KG_LOG_SOURCE`: Include file/line in logs (default: false)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("KG_SERVICE_NAME")
                .unwrap_or_else(|_| "kg-repository".to_string()),

            log_level: env::var("KG_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            json_logs: env::var("KG_JSON_LOGS")
                .map(|v| parse_flag(&v))
                .unwrap_or(is_container),

            with_source_location: env::var("KG_LOG_SOURCE")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}
