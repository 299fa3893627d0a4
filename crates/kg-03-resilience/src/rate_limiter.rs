//! # Rate Limiter
//!
//! Token bucket that guards calls into the store.
//!
//! ## Algorithm
//!
//! - The bucket starts full at `capacity`
//! - Each call consumes one token
//! - `refill_amount` tokens are added every `refill_interval`, capped at `capacity`
//!
//! Every access first credits the intervals that have fully elapsed since
//! the last refill, so a limiter without a refill task still recovers.
//! [`RateLimiter::spawn_refill`] additionally refills on a fixed interval,
//! independent of request traffic, and wakes blocked waiters on every tick.

use parking_lot::Mutex;
use shared_types::{Context, RepositoryError, RepositoryResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum burst size.
    pub capacity: u64,
    /// Tokens added per refill tick.
    pub refill_amount: u64,
    pub refill_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            refill_amount: 10,
            refill_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: u64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    config: RateLimiterConfig,
    bucket: Mutex<Bucket>,
    refilled: Notify,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, config: RateLimiterConfig) -> Self {
        Self {
            name: name.into(),
            bucket: Mutex::new(Bucket {
                tokens: config.capacity,
                last_refill: Instant::now(),
            }),
            config,
            refilled: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Credit every whole interval elapsed since the last refill.
    fn catch_up(&self, bucket: &mut Bucket, now: Instant) {
        let interval = self.config.refill_interval;
        if interval.is_zero() {
            bucket.tokens = self.config.capacity;
            bucket.last_refill = now;
            return;
        }
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let ticks = u64::try_from(elapsed.as_nanos() / interval.as_nanos()).unwrap_or(u64::MAX);
        if ticks == 0 {
            return;
        }
        bucket.tokens = bucket
            .tokens
            .saturating_add(ticks.saturating_mul(self.config.refill_amount))
            .min(self.config.capacity);
        let credited = u32::try_from(ticks)
            .ok()
            .and_then(|ticks| interval.checked_mul(ticks))
            .and_then(|span| bucket.last_refill.checked_add(span));
        bucket.last_refill = match credited {
            Some(at) if bucket.tokens < self.config.capacity && self.config.refill_amount > 0 => at,
            _ => now,
        };
    }

    /// Take a token, or report when the next refill is due.
    fn take(&self) -> Result<(), Instant> {
        let mut bucket = self.bucket.lock();
        self.catch_up(&mut bucket, Instant::now());
        if bucket.tokens == 0 {
            return Err(bucket.last_refill + self.config.refill_interval);
        }
        bucket.tokens -= 1;
        Ok(())
    }

    /// Take a token or fail immediately with `RateLimited`.
    pub fn try_allow(&self) -> RepositoryResult<()> {
        if self.take().is_ok() {
            Ok(())
        } else {
            trace!(limiter = %self.name, "Rate limit reached");
            Err(RepositoryError::RateLimited {
                resource: self.name.clone(),
            })
        }
    }

    /// Wait for a token, or until `ctx` is done.
    pub async fn allow(&self, ctx: &Context) -> RepositoryResult<()> {
        loop {
            ctx.check()?;

            // Register before checking so a refill between the check and the
            // wait is not missed.
            let notified = self.refilled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_refill = match self.take() {
                Ok(()) => return Ok(()),
                Err(at) => at,
            };

            tokio::select! {
                reason = ctx.done() => return Err(reason.into()),
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(next_refill) => {}
            }
        }
    }

    /// Add one tick's worth of tokens and wake waiters.
    pub fn refill(&self) {
        let added = {
            let mut bucket = self.bucket.lock();
            let before = bucket.tokens;
            bucket.tokens = before
                .saturating_add(self.config.refill_amount)
                .min(self.config.capacity);
            bucket.last_refill = Instant::now();
            bucket.tokens - before
        };
        if added > 0 {
            self.refilled.notify_waiters();
        }
    }

    pub fn available(&self) -> u64 {
        let mut bucket = self.bucket.lock();
        self.catch_up(&mut bucket, Instant::now());
        bucket.tokens
    }

    pub fn is_limited(&self) -> bool {
        self.available() == 0
    }

    /// Refill every `refill_interval` until `ctx` is done.
    pub fn spawn_refill(self: Arc<Self>, ctx: Context) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.refill_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    reason = ctx.done() => {
                        debug!(limiter = %self.name, %reason, "Rate limiter refill stopped");
                        break;
                    }
                    _ = ticker.tick() => self.refill(),
                }
            }
        })
    }
}
