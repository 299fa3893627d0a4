//! # KG-03 Resilience
//!
//! Guards around calls into the store.
//!
//! ## Components
//!
//! - `retry_with_backoff`: exponential backoff with symmetric jitter, retrying
//!   only transient errors
//! - `CircuitBreaker` / `CircuitBreakerRegistry`: closed, open and half-open
//!   per dependency
//! - `RateLimiter`: token bucket refilled on a fixed interval
//! - `ResourceManager`: bounded connection permits and cancellable
//!   per-operation sub-contexts
//! - `BatchExecutor`: bounded concurrency with per-item outcomes
//!
//! Every blocking point (backoff sleep, token wait, permit wait) returns
//! promptly when its `Context` is cancelled or past its deadline.
//!
//! ## Background tasks
//!
//! `RateLimiter::spawn_refill` and `ResourceManager::spawn_sweeper` run on
//! fixed intervals and stop when the context they were given is done. The
//! rate limiter also credits elapsed intervals on access, so the refill task
//! is optional.

pub mod batch;
pub mod circuit_breaker;
pub mod rate_limiter;
pub mod resource_manager;
pub mod retry;

pub use batch::{BatchConfig, BatchExecutor, BatchReport, ItemOutcome};
pub use circuit_breaker::{
    counts_as_failure, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
    CircuitStats,
};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use resource_manager::{
    ConnectionPermit, OperationGuard, OperationInfo, ResourceManager, ResourceManagerConfig,
};
pub use retry::{backoff_delay, retry_with_backoff, RetryConfig};

/// Result alias for resilience operations.
pub type ResilienceResult<T> = Result<T, shared_types::RepositoryError>;
