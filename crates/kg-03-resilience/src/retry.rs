//! Retry with exponential backoff and symmetric jitter.
//!
//! ```text
//! delay(n) = min(max_delay, base_delay * backoff_factor^n + jitter)
//! jitter   = base_delay * backoff_factor^n * jitter_factor * (2 * rand() - 1)
//! ```
//!
//! Only retryable errors (see [`RepositoryError::is_retryable`]) are retried;
//! everything else is returned on first occurrence.

use rand::Rng;
use shared_types::{Context, RepositoryError, RepositoryResult};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total invocations, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Fraction of the exponential delay used as +/- jitter.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }
}

/// Delay before retry number `attempt` (0-based) for a uniform sample `unit` in `[0, 1)`.
pub fn backoff_delay(config: &RetryConfig, attempt: u32, unit: f64) -> Duration {
    let exponential =
        config.base_delay.as_secs_f64() * config.backoff_factor.powi(attempt.min(i32::MAX as u32) as i32);
    let jitter = exponential * config.jitter_factor * (2.0 * unit - 1.0);
    let seconds = (exponential + jitter)
        .min(config.max_delay.as_secs_f64())
        .max(0.0);
    if seconds.is_finite() {
        Duration::from_secs_f64(seconds)
    } else {
        config.max_delay
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
///
/// Waits between attempts observe `ctx`; cancellation ends the loop with
/// `RepositoryError::Cancelled`. Exhaustion yields
/// `RepositoryError::RetryExhausted` carrying the attempt count and the last
/// error.
pub async fn retry_with_backoff<T, F, Fut>(
    ctx: &Context,
    config: &RetryConfig,
    mut op: F,
) -> RepositoryResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RepositoryResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        ctx.check()?;
        let err = match op().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => err,
        };

        attempt += 1;
        if attempt >= max_attempts {
            warn!(attempts = attempt, error = %err, "Retry attempts exhausted");
            return Err(RepositoryError::RetryExhausted {
                attempts: attempt,
                last: Box::new(err),
            });
        }

        let delay = backoff_delay(config, attempt - 1, rand::thread_rng().gen::<f64>());
        debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying after transient failure"
        );

        tokio::select! {
            reason = ctx.done() => return Err(reason.into()),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
