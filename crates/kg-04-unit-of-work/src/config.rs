//! Aggregate configuration for the repository core.
//!
//! Built once at process start and passed to whatever needs it; there are
//! no process-wide defaults to mutate.

use kg_01_query::QueryLimits;
use kg_02_concurrency::IdempotencyConfig;
use kg_03_resilience::{
    BatchConfig, CircuitBreakerConfig, RateLimiterConfig, ResourceManagerConfig, RetryConfig,
};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limiter: RateLimiterConfig,
    pub resources: ResourceManagerConfig,
    pub batch: BatchConfig,
    pub idempotency: IdempotencyConfig,
    pub query_limits: QueryLimits,
    /// Entries kept by the caching decorator; 0 disables it.
    pub cache_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limiter: RateLimiterConfig::default(),
            resources: ResourceManagerConfig::default(),
            batch: BatchConfig::default(),
            idempotency: IdempotencyConfig::default(),
            query_limits: QueryLimits::default(),
            cache_capacity: 1_000,
        }
    }
}

impl CoreConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `KG_RETRY_MAX_ATTEMPTS`: attempts including the first (default: 3)
    /// - `KG_RETRY_BASE_DELAY_MS`: first backoff delay (default: 100)
    /// - `KG_CB_MAX_FAILURES`: consecutive failures before opening (default: 5)
    /// - `KG_CB_RESET_TIMEOUT_SECS`: time spent open (default: 30)
    /// - `KG_RATE_LIMIT_CAPACITY`: token bucket size (default: 100)
    /// - `KG_RATE_LIMIT_REFILL`: tokens per refill tick (default: 10)
    /// - `KG_MAX_CONNECTIONS`: connection permits (default: 100)
    /// - `KG_OPERATION_TIMEOUT_SECS`: per-operation timeout (default: 30)
    /// - `KG_BATCH_CONCURRENCY`: concurrent batch items (default: 10)
    /// - `KG_IDEMPOTENCY_RETENTION_SECS`: idempotency window (default: 86400)
    /// - `KG_MAX_QUERY_LIMIT`: largest page size accepted (default: 10000)
    /// - `KG_CACHE_CAPACITY`: cached nodes, 0 disables (default: 1000)
    ///
    /// Missing or unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`CoreConfig::from_env`], reading values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let read = &lookup;

        if let Some(v) = parse(read, "KG_RETRY_MAX_ATTEMPTS") {
            config.retry.max_attempts = v;
        }
        if let Some(ms) = parse(read, "KG_RETRY_BASE_DELAY_MS") {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(v) = parse(read, "KG_CB_MAX_FAILURES") {
            config.circuit_breaker.max_failures = v;
        }
        if let Some(secs) = parse(read, "KG_CB_RESET_TIMEOUT_SECS") {
            config.circuit_breaker.reset_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = parse(read, "KG_RATE_LIMIT_CAPACITY") {
            config.rate_limiter.capacity = v;
        }
        if let Some(v) = parse(read, "KG_RATE_LIMIT_REFILL") {
            config.rate_limiter.refill_amount = v;
        }
        if let Some(v) = parse(read, "KG_MAX_CONNECTIONS") {
            config.resources.max_connections = v;
        }
        if let Some(secs) = parse(read, "KG_OPERATION_TIMEOUT_SECS") {
            config.resources.operation_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = parse(read, "KG_BATCH_CONCURRENCY") {
            config.batch.max_concurrency = v;
        }
        if let Some(secs) = parse(read, "KG_IDEMPOTENCY_RETENTION_SECS") {
            config.idempotency.retention = Duration::from_secs(secs);
        }
        if let Some(v) = parse(read, "KG_MAX_QUERY_LIMIT") {
            config.query_limits.max_limit = v;
        }
        if let Some(v) = parse(read, "KG_CACHE_CAPACITY") {
            config.cache_capacity = v;
        }
        config
    }
}

fn parse<T: FromStr>(read: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = read(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable configuration value");
            None
        }
    }
}
