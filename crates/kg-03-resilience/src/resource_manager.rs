//! Connection permits and active-operation tracking.
//!
//! Connections are a fixed pool of semaphore permits. Every tracked operation
//! gets its own sub-context with the configured operation timeout, which an
//! administrator can cancel by operation id or by user.

use parking_lot::Mutex;
use shared_types::{CancelHandle, Context, ContextError, RepositoryError, RepositoryResult, UserId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ResourceManagerConfig {
    pub max_connections: usize,
    /// How long `acquire_connection` waits for a free permit.
    pub acquire_timeout: Duration,
    /// Lifetime of each tracked operation's sub-context.
    pub operation_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for ResourceManagerConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            acquire_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(10),
        }
    }
}

/// Held for as long as a connection is in use.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug)]
struct OperationEntry {
    user_id: UserId,
    name: String,
    started_at: Instant,
    deadline: Instant,
    cancel: CancelHandle,
}

/// Snapshot of a tracked operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationInfo {
    pub id: Uuid,
    pub user_id: UserId,
    pub name: String,
    pub running_for: Duration,
}

type OperationTable = Arc<Mutex<HashMap<Uuid, OperationEntry>>>;

/// Tracks one operation; dropping it stops tracking.
#[derive(Debug)]
pub struct OperationGuard {
    id: Uuid,
    context: Context,
    operations: OperationTable,
}

impl OperationGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Sub-context to pass to everything the operation does.
    pub fn context(&self) -> &Context {
        &self.context
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.operations.lock().remove(&self.id);
    }
}

#[derive(Debug)]
pub struct ResourceManager {
    config: ResourceManagerConfig,
    connections: Arc<Semaphore>,
    operations: OperationTable,
}

impl ResourceManager {
    pub fn new(config: ResourceManagerConfig) -> Self {
        Self {
            connections: Arc::new(Semaphore::new(config.max_connections)),
            operations: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    pub fn config(&self) -> &ResourceManagerConfig {
        &self.config
    }

    pub fn available_connections(&self) -> usize {
        self.connections.available_permits()
    }

    /// Wait up to `acquire_timeout` for a connection permit.
    pub async fn acquire_connection(&self, ctx: &Context) -> RepositoryResult<ConnectionPermit> {
        ctx.check()?;
        let acquire = tokio::time::timeout(
            self.config.acquire_timeout,
            self.connections.clone().acquire_owned(),
        );

        tokio::select! {
            reason = ctx.done() => Err(reason.into()),
            acquired = acquire => match acquired {
                Ok(Ok(permit)) => Ok(ConnectionPermit { _permit: permit }),
                Ok(Err(_)) => Err(RepositoryError::invalid_state("acquire_connection", "pool closed")),
                Err(_) => {
                    warn!(
                        timeout_ms = self.config.acquire_timeout.as_millis() as u64,
                        "Connection pool exhausted"
                    );
                    Err(RepositoryError::Timeout {
                        operation: "acquire_connection".to_string(),
                        after: self.config.acquire_timeout,
                    })
                }
            },
        }
    }

    /// Start tracking an operation under a cancellable, time-limited sub-context.
    pub fn begin_operation(&self, ctx: &Context, user_id: &UserId, name: &str) -> OperationGuard {
        let (child, cancel) = ctx.with_cancel();
        let context = child.with_timeout(self.config.operation_timeout);
        let started_at = Instant::now();
        let id = Uuid::new_v4();

        self.operations.lock().insert(
            id,
            OperationEntry {
                user_id: user_id.clone(),
                name: name.to_string(),
                started_at,
                deadline: started_at + self.config.operation_timeout,
                cancel,
            },
        );
        debug!(operation_id = %id, user_id = %user_id, operation = name, "Operation started");

        OperationGuard {
            id,
            context,
            operations: self.operations.clone(),
        }
    }

    /// Cancel one operation. Returns `false` if it is not tracked.
    pub fn cancel_operation(&self, id: Uuid) -> bool {
        match self.operations.lock().get(&id) {
            Some(entry) => {
                info!(operation_id = %id, operation = %entry.name, "Operation cancelled");
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every operation owned by `user_id`; returns how many.
    pub fn cancel_user_operations(&self, user_id: &UserId) -> usize {
        let operations = self.operations.lock();
        let mut cancelled = 0;
        for entry in operations.values().filter(|e| &e.user_id == user_id) {
            entry.cancel.cancel();
            cancelled += 1;
        }
        if cancelled > 0 {
            info!(user_id = %user_id, cancelled, "User operations cancelled");
        }
        cancelled
    }

    pub fn active_operations(&self) -> Vec<OperationInfo> {
        let now = Instant::now();
        let mut active: Vec<OperationInfo> = self
            .operations
            .lock()
            .iter()
            .map(|(id, entry)| OperationInfo {
                id: *id,
                user_id: entry.user_id.clone(),
                name: entry.name.clone(),
                running_for: now.saturating_duration_since(entry.started_at),
            })
            .collect();
        active.sort_by(|a, b| b.running_for.cmp(&a.running_for).then(a.id.cmp(&b.id)));
        active
    }

    /// Cancel and forget operations past their timeout; returns how many.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut operations = self.operations.lock();
        let before = operations.len();
        operations.retain(|id, entry| {
            if entry.deadline <= now {
                warn!(operation_id = %id, operation = %entry.name, "Sweeping expired operation");
                entry.cancel.cancel();
                false
            } else {
                true
            }
        });
        before - operations.len()
    }

    /// Sweep every `sweep_interval` until `ctx` is done.
    pub fn spawn_sweeper(self: Arc<Self>, ctx: Context) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    reason = ctx.done() => {
                        debug!(%reason, "Operation sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.sweep_expired();
                    }
                }
            }
        })
    }

    /// Track `op`, hold a connection for its duration and bound it by the
    /// operation timeout.
    ///
    /// Running past the operation timeout yields `Timeout`; caller or
    /// administrative cancellation yields `Cancelled`.
    pub async fn run_operation<T, F, Fut>(
        &self,
        ctx: &Context,
        user_id: &UserId,
        name: &str,
        op: F,
    ) -> RepositoryResult<T>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = RepositoryResult<T>>,
    {
        let guard = self.begin_operation(ctx, user_id, name);
        let op_ctx = guard.context().clone();
        let _connection = self.acquire_connection(&op_ctx).await?;

        match op_ctx.run(op(op_ctx.clone())).await {
            Err(RepositoryError::Cancelled { .. })
                if op_ctx.err() == Some(ContextError::DeadlineExceeded) && ctx.err().is_none() =>
            {
                Err(RepositoryError::Timeout {
                    operation: name.to_string(),
                    after: self.config.operation_timeout,
                })
            }
            other => other,
        }
    }
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new(ResourceManagerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(max_connections: usize) -> ResourceManager {
        ResourceManager::new(ResourceManagerConfig {
            max_connections,
            acquire_timeout: Duration::from_millis(200),
            operation_timeout: Duration::from_secs(1),
            sweep_interval: Duration::from_millis(500),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out_when_exhausted() {
        let manager = manager(1);
        let ctx = Context::background();
        let held = manager.acquire_connection(&ctx).await.unwrap();
        assert_eq!(manager.available_connections(), 0);

        let err = manager.acquire_connection(&ctx).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Timeout { ref operation, .. } if operation == "acquire_connection"));

        drop(held);
        assert!(manager.acquire_connection(&ctx).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_by_id_unblocks_wait() {
        let manager = manager(1);
        let _held = manager.acquire_connection(&Context::background()).await.unwrap();
        let guard = manager.begin_operation(&Context::background(), &UserId::new("u"), "save");

        let waiter = manager.acquire_connection(guard.context());
        let admin = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(manager.cancel_operation(guard.id()));
        };
        let (result, ()) = tokio::join!(waiter, admin);
        assert!(matches!(result, Err(RepositoryError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_cancel_user_operations() {
        let manager = manager(4);
        let ctx = Context::background();
        let alice = UserId::new("alice");
        let a1 = manager.begin_operation(&ctx, &alice, "save");
        let a2 = manager.begin_operation(&ctx, &alice, "delete");
        let b = manager.begin_operation(&ctx, &UserId::new("bob"), "save");

        assert_eq!(manager.cancel_user_operations(&alice), 2);
        assert!(a1.context().is_cancelled());
        assert!(a2.context().is_cancelled());
        assert!(!b.context().is_cancelled());
    }

    #[tokio::test]
    async fn test_guard_drop_stops_tracking() {
        let manager = manager(1);
        let guard = manager.begin_operation(&Context::background(), &UserId::new("u"), "save");
        assert_eq!(manager.active_operations().len(), 1);
        let id = guard.id();
        drop(guard);
        assert!(manager.active_operations().is_empty());
        assert!(!manager.cancel_operation(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_cancels_expired() {
        let manager = Arc::new(manager(1));
        let (ctx, cancel) = Context::background().with_cancel();
        let sweeper = manager.clone().spawn_sweeper(ctx);

        let guard = manager.begin_operation(&Context::background(), &UserId::new("u"), "slow");
        tokio::time::sleep(Duration::from_millis(1600)).await;

        assert!(manager.active_operations().is_empty());
        assert!(guard.context().is_cancelled());

        cancel.cancel();
        sweeper.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_operation_maps_deadline_to_timeout() {
        let manager = manager(1);
        let err = manager
            .run_operation(&Context::background(), &UserId::new("u"), "slow", |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Timeout { ref operation, .. } if operation == "slow"));
        assert_eq!(manager.available_connections(), 1);
        assert!(manager.active_operations().is_empty());
    }

    #[tokio::test]
    async fn test_run_operation_passes_result() {
        let manager = manager(1);
        let value = manager
            .run_operation(&Context::background(), &UserId::new("u"), "read", |ctx| async move {
                assert!(ctx.deadline().is_some());
                Ok(7)
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
