//! Prometheus metrics for repository operations.
//!
//! All metrics follow the naming convention: `kg_repository_<metric>_<unit>`.
//! Metrics are registered into a caller-owned [`Registry`]; there is no
//! process-global registry.
//!
//! ## Metric Types
//!
//! - **Counter**: operations by `operation` and `outcome`
//! - **Histogram**: operation latency by `operation`
//! - **Gauge**: cache entries currently held

use prometheus::{
    exponential_buckets, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;

use crate::TelemetryError;

/// Outcome label for an operation counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    NotFound,
    Conflict,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::NotFound => "not_found",
            Outcome::Conflict => "conflict",
            Outcome::Error => "error",
        }
    }
}

/// Metric handles used by the metrics repository decorator.
#[derive(Clone)]
pub struct RepositoryMetrics {
    operations: IntCounterVec,
    latency: HistogramVec,
    cache_entries: IntGauge,
}

impl RepositoryMetrics {
    /// Create the metrics and register them into `registry`.
    pub fn register(registry: &Registry) -> Result<Self, TelemetryError> {
        let operations = IntCounterVec::new(
            Opts::new(
                "kg_repository_operations_total",
                "Repository operations by outcome",
            ),
            &["operation", "outcome"],
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

        let buckets = exponential_buckets(0.0005, 2.0, 14)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
        let latency = HistogramVec::new(
            HistogramOpts::new(
                "kg_repository_operation_duration_seconds",
                "Repository operation latency",
            )
            .buckets(buckets),
            &["operation"],
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

        let cache_entries = IntGauge::new(
            "kg_repository_cache_entries",
            "Entries held by the caching decorator",
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

        registry
            .register(Box::new(operations.clone()))
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
        registry
            .register(Box::new(latency.clone()))
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
        registry
            .register(Box::new(cache_entries.clone()))
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

        Ok(Self {
            operations,
            latency,
            cache_entries,
        })
    }

    /// Record one finished operation.
    pub fn observe(&self, operation: &str, outcome: Outcome, elapsed: Duration) {
        self.operations
            .with_label_values(&[operation, outcome.as_str()])
            .inc();
        self.latency
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    pub fn set_cache_entries(&self, entries: usize) {
        self.cache_entries.set(entries as i64);
    }

    /// Count of operations recorded with the given labels.
    pub fn operation_count(&self, operation: &str, outcome: Outcome) -> u64 {
        self.operations
            .with_label_values(&[operation, outcome.as_str()])
            .get()
    }
}

/// Render a registry in the Prometheus text exposition format.
pub fn encode_text(registry: &Registry) -> Result<String, TelemetryError> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_observe() {
        let registry = Registry::new();
        let metrics = RepositoryMetrics::register(&registry).unwrap();

        metrics.observe("find_by_id", Outcome::Success, Duration::from_millis(3));
        metrics.observe("find_by_id", Outcome::NotFound, Duration::from_millis(1));
        metrics.observe("find_by_id", Outcome::Success, Duration::from_millis(2));

        assert_eq!(metrics.operation_count("find_by_id", Outcome::Success), 2);
        assert_eq!(metrics.operation_count("find_by_id", Outcome::NotFound), 1);

        let text = encode_text(&registry).unwrap();
        assert!(text.contains("kg_repository_operations_total"));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        RepositoryMetrics::register(&registry).unwrap();
        assert!(RepositoryMetrics::register(&registry).is_err());
    }
}
