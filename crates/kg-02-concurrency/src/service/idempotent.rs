//! Idempotent execution and the retention sweep.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared_types::{Context, RepositoryError, RepositoryResult, UserId};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{generate_idempotency_key, IdempotencyConfig, IdempotencyKey, IdempotencyRecord};
use crate::ports::IdempotencyStore;

/// Entry point for idempotent operations over a shared store.
#[derive(Clone)]
pub struct IdempotencyService {
    store: Arc<dyn IdempotencyStore>,
    config: IdempotencyConfig,
}

impl IdempotencyService {
    pub fn new(store: Arc<dyn IdempotencyStore>, config: IdempotencyConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn IdempotencyStore> {
        &self.store
    }

    pub fn config(&self) -> &IdempotencyConfig {
        &self.config
    }

    /// Wrap `op` under the key derived from `(user_id, operation, payload)`.
    pub fn operation<P, F>(
        &self,
        user_id: &UserId,
        operation: &str,
        payload: &P,
        op: F,
    ) -> RepositoryResult<IdempotentOperation<F>>
    where
        P: Serialize + ?Sized,
    {
        let key = generate_idempotency_key(user_id, operation, payload)?;
        Ok(IdempotentOperation {
            store: self.store.clone(),
            key,
            op,
        })
    }

    /// Evict records older than the retention window.
    pub async fn cleanup(&self) -> RepositoryResult<usize> {
        let retention = chrono::Duration::from_std(self.config.retention)
            .map_err(|e| RepositoryError::validation("retention", e.to_string()))?;
        self.store.cleanup(Utc::now() - retention).await
    }

    /// Run [`cleanup`](Self::cleanup) every `cleanup_interval` until `ctx` is done.
    pub fn spawn_cleanup_task(&self, ctx: Context) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.config.cleanup_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    reason = ctx.done() => {
                        debug!(%reason, "Idempotency cleanup stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        match service.cleanup().await {
                            Ok(0) => {}
                            Ok(removed) => info!(removed, "Evicted expired idempotency records"),
                            Err(err) => warn!(error = %err, "Idempotency cleanup failed"),
                        }
                    }
                }
            }
        })
    }
}

/// An operation that runs at most once per key.
pub struct IdempotentOperation<F> {
    store: Arc<dyn IdempotencyStore>,
    key: IdempotencyKey,
    op: F,
}

impl<F> IdempotentOperation<F> {
    pub fn key(&self) -> &IdempotencyKey {
        &self.key
    }

    /// Return the recorded result for this key, or run the operation once.
    ///
    /// Only successful results are recorded. A failure to write the record
    /// is logged and the operation's own result is returned.
    pub async fn execute<T, Fut>(self, ctx: &Context) -> RepositoryResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RepositoryResult<T>>,
        T: Serialize + DeserializeOwned,
    {
        ctx.check()?;

        if let Some(record) = self.store.get(&self.key).await? {
            debug!(key = %self.key, "Replaying recorded idempotent result");
            return Ok(serde_json::from_value(record.result)?);
        }

        let value = (self.op)().await?;

        let encoded = match serde_json::to_value(&value) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(key = %self.key, error = %err, "Result not recordable");
                return Ok(value);
            }
        };

        match self
            .store
            .put_if_absent(IdempotencyRecord::new(self.key.clone(), encoded.clone()))
            .await
        {
            Ok(stored) if stored.result != encoded => {
                debug!(key = %self.key, "Concurrent duplicate recorded first");
                Ok(serde_json::from_value(stored.result)?)
            }
            Ok(_) => Ok(value),
            Err(err) => {
                warn!(key = %self.key, error = %err, "Failed to record idempotent result");
                Ok(value)
            }
        }
    }
}
