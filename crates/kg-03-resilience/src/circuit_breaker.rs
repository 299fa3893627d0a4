//! Circuit breaker for store dependencies.
//!
//! # Circuit Breaker States
//!
//! ```text
//!                failures >= max_failures
//!      ┌──────────┐ ───────────────────► ┌──────────┐
//!      │  CLOSED  │                      │   OPEN   │
//!      │ (normal) │                      │ (reject) │
//!      └──────────┘                      └──────────┘
//!            ▲                              │    ▲
//!            │ half_open_max_calls          │    │ any failure
//!            │ successes     reset_timeout  ▼    │
//!            │                           ┌──────────┐
//!            └────────────────────────── │HALF-OPEN │
//!                                        │ (trial)  │
//!                                        └──────────┘
//! ```
//!
//! Rejections never invoke the guarded operation.

use parking_lot::{Mutex, RwLock};
use shared_types::{RepositoryError, RepositoryResult};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Circuit is open - requests are rejected immediately
    Open,
    /// Testing if the dependency is healthy - allows limited requests
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub max_failures: u32,
    /// Time spent open before probing
    pub reset_timeout: Duration,
    /// Trial calls admitted in half-open; this many successes close the circuit
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

/// Point-in-time view of one circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitStats {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    /// Time since the most recent failure.
    pub since_last_failure: Option<Duration>,
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    failures: u32,
    half_open_admitted: u32,
    half_open_successes: u32,
    /// Bumped on every entry into half-open; stale trial slots are ignored.
    trial_epoch: u64,
    opened_at: Option<Instant>,
    last_failure: Option<Instant>,
    total_calls: u64,
    total_failures: u64,
    total_rejections: u64,
}

impl CircuitInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            half_open_admitted: 0,
            half_open_successes: 0,
            trial_epoch: 0,
            opened_at: None,
            last_failure: None,
            total_calls: 0,
            total_failures: 0,
            total_rejections: 0,
        }
    }
}

/// Whether an error says anything about the dependency's health.
///
/// Caller mistakes and expected outcomes do not trip the breaker.
pub fn counts_as_failure(err: &RepositoryError) -> bool {
    !matches!(
        err,
        RepositoryError::Validation { .. }
            | RepositoryError::NotFound { .. }
            | RepositoryError::VersionConflict(_)
            | RepositoryError::Conflict { .. }
            | RepositoryError::Cancelled { .. }
            | RepositoryError::RateLimited { .. }
            | RepositoryError::CircuitOpen { .. }
            | RepositoryError::InvalidState { .. }
    )
}

/// One guarded dependency, shared by all of its callers.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(CircuitInner::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Admit or reject one call. Admission in half-open consumes a trial slot.
    pub fn try_acquire(&self) -> RepositoryResult<()> {
        self.admit().map(|_| ())
    }

    /// Like `try_acquire`, returning the half-open epoch when a trial slot was taken.
    fn admit(&self) -> RepositoryResult<Option<u64>> {
        let mut inner = self.inner.lock();
        inner.total_calls += 1;

        match inner.state {
            CircuitState::Closed => Ok(None),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|at| at.elapsed());
                match elapsed {
                    Some(elapsed) if elapsed < self.config.reset_timeout => {
                        inner.total_rejections += 1;
                        debug!(
                            circuit = %self.name,
                            remaining_ms = (self.config.reset_timeout - elapsed).as_millis() as u64,
                            "Circuit breaker is open, rejecting call"
                        );
                        Err(RepositoryError::CircuitOpen {
                            name: self.name.clone(),
                        })
                    }
                    _ => {
                        info!(circuit = %self.name, "Circuit breaker transitioning to half-open");
                        inner.state = CircuitState::HalfOpen;
                        inner.trial_epoch += 1;
                        inner.half_open_admitted = 1;
                        inner.half_open_successes = 0;
                        Ok(Some(inner.trial_epoch))
                    }
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_admitted < self.config.half_open_max_calls {
                    inner.half_open_admitted += 1;
                    Ok(Some(inner.trial_epoch))
                } else {
                    inner.total_rejections += 1;
                    Err(RepositoryError::CircuitOpen {
                        name: self.name.clone(),
                    })
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_max_calls {
                    info!(
                        circuit = %self.name,
                        successes = inner.half_open_successes,
                        "Circuit breaker closing after successful trials"
                    );
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.opened_at = None;
                    inner.half_open_admitted = 0;
                    inner.half_open_successes = 0;
                }
            }
            // A call admitted before the circuit opened finished late.
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.total_failures += 1;
        inner.last_failure = Some(now);

        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.max_failures {
                    warn!(
                        circuit = %self.name,
                        failures = inner.failures,
                        "Circuit breaker opening due to failures"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                }
            }
            CircuitState::HalfOpen => {
                warn!(circuit = %self.name, "Circuit breaker re-opening after failed trial");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.half_open_admitted = 0;
                inner.half_open_successes = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Hand back a half-open slot whose call never reported an outcome.
    fn release_trial(&self, epoch: u64) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen
            && inner.trial_epoch == epoch
            && inner.half_open_admitted > inner.half_open_successes
        {
            inner.half_open_admitted -= 1;
            debug!(circuit = %self.name, "Abandoned half-open trial released its slot");
        }
    }

    /// Run `op` through the breaker.
    ///
    /// If the returned future is dropped before `op` finishes, a half-open
    /// slot taken for it is released.
    pub async fn call<T, F, Fut>(&self, op: F) -> RepositoryResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RepositoryResult<T>>,
    {
        let mut trial = TrialSlot {
            breaker: self,
            epoch: self.admit()?,
        };
        let result = op().await;
        trial.epoch = None;
        match result {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                if counts_as_failure(&err) {
                    self.record_failure();
                } else {
                    self.record_success();
                }
                Err(err)
            }
        }
    }

    /// Force the circuit closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        info!(circuit = %self.name, previous = %inner.state, "Circuit breaker manually reset");
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
        inner.half_open_admitted = 0;
        inner.half_open_successes = 0;
    }

    pub fn stats(&self) -> CircuitStats {
        let inner = self.inner.lock();
        CircuitStats {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.failures,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
            since_last_failure: inner.last_failure.map(|at| at.elapsed()),
        }
    }
}

struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    epoch: Option<u64>,
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if let Some(epoch) = self.epoch.take() {
            self.breaker.release_trial(epoch);
        }
    }
}

/// Per-dependency breakers created on first use.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(name) {
            return breaker.clone();
        }
        self.breakers
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config.clone())))
            .clone()
    }

    /// Stats for every known circuit, sorted by name.
    pub fn stats(&self) -> Vec<CircuitStats> {
        let mut stats: Vec<CircuitStats> = self.breakers.read().values().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Reset one circuit; `false` if it does not exist.
    pub fn reset(&self, name: &str) -> bool {
        match self.breakers.read().get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.read().values() {
            breaker.reset();
        }
    }

    pub fn open_circuits(&self) -> Vec<String> {
        let mut open: Vec<String> = self
            .breakers
            .read()
            .values()
            .filter(|b| b.state() == CircuitState::Open)
            .map(|b| b.name().to_string())
            .collect();
        open.sort();
        open
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
