//! # Unit of Work
//!
//! Coordinates repository writes and event publication as one commit.
//!
//! ## State Machine
//!
//! ```text
//! [Created] ──begin──→ [Active] ──commit ok──→ [Committed]
//!     ↑                   │                         ↑
//!     │                   │                   retry_publish ok
//!     │                   │                         │
//!     │                   ├──publish err──→ [PublishFailed]
//!     │                   ├──commit err───→ [RolledBack]
//!     │                   └──rollback─────→ [RolledBack]
//!     └───────────────reset (not from Active)──────────┘
//! ```
//!
//! Events are buffered while active and reach the publisher only from the
//! final step of a commit whose storage step succeeded. Once storage has
//! committed the publish step runs even if the caller's context is
//! cancelled. A publish failure cannot undo the storage write: the unit of
//! work ends `PublishFailed`, keeps the events, and `retry_publish` delivers
//! them later.

use parking_lot::Mutex;
use shared_bus::EventPublisher;
use shared_types::{Context, DomainEvent, RepositoryError, RepositoryResult, TransactionError};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::TransactionManager;
use crate::ports::{RepositorySet, Transaction, TransactionProvider, TransactionalRepositoryFactory};

const BASE_STEP: &str = "database transaction";
const COMMIT_STEP: &str = "commit database transaction";
const PUBLISH_STEP: &str = "publish events";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOfWorkState {
    Created,
    Active,
    Committed,
    /// Storage committed; the buffered events were not delivered.
    PublishFailed,
    RolledBack,
}

impl fmt::Display for UnitOfWorkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitOfWorkState::Created => write!(f, "created"),
            UnitOfWorkState::Active => write!(f, "active"),
            UnitOfWorkState::Committed => write!(f, "committed"),
            UnitOfWorkState::PublishFailed => write!(f, "publish failed"),
            UnitOfWorkState::RolledBack => write!(f, "rolled back"),
        }
    }
}

#[derive(Debug, Default)]
struct SinkState {
    open: bool,
    events: Vec<DomainEvent>,
}

/// Buffer for events raised inside an active unit of work.
///
/// Clones share the same buffer, so handlers can raise events from inside
/// `UnitOfWork::run` closures.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    state: Arc<Mutex<SinkState>>,
}

impl EventSink {
    fn opened() -> Self {
        Self {
            state: Arc::new(Mutex::new(SinkState {
                open: true,
                events: Vec::new(),
            })),
        }
    }

    pub fn publish(&self, event: DomainEvent) -> RepositoryResult<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(RepositoryError::invalid_state(
                "publish_event",
                "unit of work is not active",
            ));
        }
        state.events.push(event);
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Stop accepting events and hand over what was buffered.
    fn close(&self) -> Vec<DomainEvent> {
        let mut state = self.state.lock();
        state.open = false;
        std::mem::take(&mut state.events)
    }
}

/// What a `run` closure gets to work with.
#[derive(Debug, Clone)]
pub struct UnitOfWorkScope {
    pub repositories: RepositorySet,
    pub events: EventSink,
}

impl UnitOfWorkScope {
    pub fn publish(&self, event: DomainEvent) -> RepositoryResult<()> {
        self.events.publish(event)
    }
}

/// One logical transaction at a time; reusable sequentially via `reset`.
pub struct UnitOfWork {
    provider: Arc<dyn TransactionProvider>,
    factory: Arc<dyn TransactionalRepositoryFactory>,
    publisher: Arc<dyn EventPublisher>,
    state: UnitOfWorkState,
    manager: TransactionManager,
    transaction: Option<Arc<dyn Transaction>>,
    repositories: Option<RepositorySet>,
    events: EventSink,
    undelivered: Vec<DomainEvent>,
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("state", &self.state)
            .field("transaction", &self.transaction.as_ref().map(|t| t.id().to_string()))
            .field("pending_events", &self.events.pending())
            .field("undelivered_events", &self.undelivered.len())
            .field("steps", &self.manager)
            .finish()
    }
}

impl UnitOfWork {
    pub fn new(
        provider: Arc<dyn TransactionProvider>,
        factory: Arc<dyn TransactionalRepositoryFactory>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            provider,
            factory,
            publisher,
            state: UnitOfWorkState::Created,
            manager: TransactionManager::new(),
            transaction: None,
            repositories: None,
            events: EventSink::default(),
            undelivered: Vec::new(),
        }
    }

    /// Build over a store that both opens transactions and binds repositories.
    pub fn over<S>(store: S, publisher: Arc<dyn EventPublisher>) -> Self
    where
        S: TransactionProvider + TransactionalRepositoryFactory + Clone + 'static,
    {
        Self::new(Arc::new(store.clone()), Arc::new(store), publisher)
    }

    pub fn state(&self) -> UnitOfWorkState {
        self.state
    }

    pub fn pending_events(&self) -> usize {
        self.events.pending()
    }

    /// Events of a committed transaction that the publisher refused.
    pub fn undelivered_events(&self) -> &[DomainEvent] {
        &self.undelivered
    }

    /// Repositories bound to the open transaction.
    pub fn repositories(&self) -> RepositoryResult<RepositorySet> {
        match (&self.state, &self.repositories) {
            (UnitOfWorkState::Active, Some(repositories)) => Ok(repositories.clone()),
            _ => Err(RepositoryError::invalid_state("repositories", self.state)),
        }
    }

    /// Buffer an event for delivery after a successful commit.
    pub fn publish_event(&self, event: DomainEvent) -> RepositoryResult<()> {
        self.events.publish(event)
    }

    /// Shared handle onto the event buffer of the current transaction.
    pub fn event_sink(&self) -> EventSink {
        self.events.clone()
    }

    pub async fn begin(&mut self, ctx: &Context) -> RepositoryResult<()> {
        if self.state != UnitOfWorkState::Created {
            return Err(RepositoryError::invalid_state("begin", self.state));
        }
        ctx.check()?;

        let transaction = self.provider.begin_transaction(ctx).await?;
        let repositories = match self.factory.repositories(transaction.clone()) {
            Ok(repositories) => repositories,
            Err(error) => {
                discard(ctx, transaction.as_ref()).await;
                return Err(error);
            }
        };

        let handle = transaction.clone();
        self.manager.add_step(
            BASE_STEP,
            |_ctx| async { Ok(()) },
            move |ctx| async move { handle.rollback(&ctx).await },
        );
        if let Err(error) = self.manager.execute(ctx).await {
            discard(ctx, transaction.as_ref()).await;
            self.manager = TransactionManager::new();
            return Err(error);
        }

        info!(transaction_id = %transaction.id(), "Unit of work begun");
        self.transaction = Some(transaction);
        self.repositories = Some(repositories);
        self.events = EventSink::opened();
        self.state = UnitOfWorkState::Active;
        Ok(())
    }

    /// Commit storage, then publish buffered events.
    ///
    /// A failure before storage commits rolls back and leaves the unit of
    /// work `RolledBack`. A publish failure after it leaves `PublishFailed`.
    pub async fn commit(&mut self, ctx: &Context) -> RepositoryResult<()> {
        if self.state != UnitOfWorkState::Active {
            return Err(RepositoryError::invalid_state("commit", self.state));
        }
        let transaction = self
            .transaction
            .take()
            .ok_or_else(|| RepositoryError::invalid_state("commit", "no open transaction"))?;
        self.repositories = None;
        let events = self.events.close();
        let event_count = events.len();

        let committing = transaction.clone();
        self.manager.add_irreversible_step(COMMIT_STEP, move |ctx| async move {
            committing.commit(&ctx).await
        });
        let mut outbox = Vec::new();
        if !events.is_empty() {
            outbox = events.clone();
            let publisher = self.publisher.clone();
            self.manager.add_detached_step(PUBLISH_STEP, move |ctx| async move {
                publisher.publish(&ctx, events).await
            });
        }

        match self.manager.execute(ctx).await {
            Ok(()) => {
                self.state = UnitOfWorkState::Committed;
                info!(
                    transaction_id = %transaction.id(),
                    events = event_count,
                    "Unit of work committed"
                );
                Ok(())
            }
            Err(error) if failed_at(&error, PUBLISH_STEP) => {
                self.state = UnitOfWorkState::PublishFailed;
                self.undelivered = outbox;
                warn!(
                    transaction_id = %transaction.id(),
                    events = event_count,
                    error = %error,
                    "Unit of work committed but events were not published"
                );
                Err(error)
            }
            Err(error) => {
                self.state = UnitOfWorkState::RolledBack;
                warn!(transaction_id = %transaction.id(), error = %error, "Unit of work commit failed");
                Err(error)
            }
        }
    }

    /// Deliver the events a committed transaction failed to publish.
    pub async fn retry_publish(&mut self, ctx: &Context) -> RepositoryResult<()> {
        if self.state != UnitOfWorkState::PublishFailed {
            return Err(RepositoryError::invalid_state("retry_publish", self.state));
        }
        self.publisher.publish(ctx, self.undelivered.clone()).await?;
        info!(events = self.undelivered.len(), "Undelivered events published");
        self.undelivered.clear();
        self.state = UnitOfWorkState::Committed;
        Ok(())
    }

    /// Undo the open transaction and drop buffered events.
    ///
    /// A no-op unless the unit of work is active.
    pub async fn rollback(&mut self, ctx: &Context) -> RepositoryResult<()> {
        if self.state != UnitOfWorkState::Active {
            debug!(state = %self.state, "Rollback ignored");
            return Ok(());
        }
        let dropped = self.events.close().len();
        let failures = self.manager.rollback(ctx).await;
        self.transaction = None;
        self.repositories = None;
        self.state = UnitOfWorkState::RolledBack;
        info!(dropped_events = dropped, "Unit of work rolled back");

        match failures.first() {
            None => Ok(()),
            Some(first) => Err(RepositoryError::Transaction(TransactionError {
                step: "rollback".to_string(),
                cause: first.error.clone(),
                rollback_errors: failures,
            })),
        }
    }

    /// Return to `Created` for the next logical transaction.
    ///
    /// Undelivered events of a `PublishFailed` commit are dropped.
    pub fn reset(&mut self) -> RepositoryResult<()> {
        if self.state == UnitOfWorkState::Active {
            return Err(RepositoryError::invalid_state("reset", self.state));
        }
        if !self.undelivered.is_empty() {
            warn!(dropped_events = self.undelivered.len(), "Reset dropped undelivered events");
            self.undelivered.clear();
        }
        self.manager = TransactionManager::new();
        self.transaction = None;
        self.repositories = None;
        self.events = EventSink::default();
        self.state = UnitOfWorkState::Created;
        Ok(())
    }

    /// Begin, run `work`, then commit on `Ok` or roll back on `Err`.
    ///
    /// Resets first, so the same instance can serve request after request.
    pub async fn run<F, Fut, T>(&mut self, ctx: &Context, work: F) -> RepositoryResult<T>
    where
        F: FnOnce(UnitOfWorkScope) -> Fut,
        Fut: Future<Output = RepositoryResult<T>>,
    {
        self.reset()?;
        self.begin(ctx).await?;
        let scope = UnitOfWorkScope {
            repositories: self.repositories()?,
            events: self.events.clone(),
        };

        match work(scope).await {
            Ok(value) => {
                self.commit(ctx).await?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_error) = self.rollback(ctx).await {
                    warn!(error = %rollback_error, "Rollback after failed work also failed");
                }
                Err(error)
            }
        }
    }
}

fn failed_at(error: &RepositoryError, step: &str) -> bool {
    matches!(error, RepositoryError::Transaction(tx) if tx.step == step)
}

async fn discard(ctx: &Context, transaction: &dyn Transaction) {
    if let Err(error) = transaction.rollback(ctx).await {
        warn!(transaction_id = %transaction.id(), error = %error, "Failed to discard transaction");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryStore;
    use async_trait::async_trait;
    use shared_bus::{EventFilter, InMemoryEventBus};
    use shared_types::{CancelHandle, DomainEventKind, Node, UserId};
    use std::sync::atomic::{AtomicU64, Ordering};

    fn created(node: &Node) -> DomainEvent {
        DomainEvent::new(
            node.user_id.clone(),
            DomainEventKind::NodeCreated {
                node_id: node.id.clone(),
            },
        )
    }

    fn setup() -> (InMemoryStore, Arc<InMemoryEventBus>, UnitOfWork) {
        let store = InMemoryStore::new();
        let bus = Arc::new(InMemoryEventBus::new());
        let uow = UnitOfWork::over(store.clone(), bus.clone());
        (store, bus, uow)
    }

    struct FailingPublisher {
        attempts: AtomicU64,
    }

    #[async_trait]
    impl EventPublisher for FailingPublisher {
        async fn publish(&self, _ctx: &Context, _events: Vec<DomainEvent>) -> RepositoryResult<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(RepositoryError::storage("broker unreachable"))
        }

        fn events_published(&self) -> u64 {
            0
        }
    }

    #[tokio::test]
    async fn test_commit_applies_writes_and_publishes_once() {
        let (store, bus, mut uow) = setup();
        let ctx = Context::background();
        let user = UserId::new("u1");
        let mut subscription = bus.subscribe(EventFilter::all());

        uow.begin(&ctx).await.unwrap();
        let repos = uow.repositories().unwrap();
        let node = repos.nodes.save(&ctx, &Node::new(user.clone(), "a")).await.unwrap();
        uow.publish_event(created(&node)).unwrap();
        assert_eq!(uow.pending_events(), 1);
        assert_eq!(store.node_count(&user), 0);

        uow.commit(&ctx).await.unwrap();
        assert_eq!(uow.state(), UnitOfWorkState::Committed);
        assert_eq!(store.node_count(&user), 1);
        assert_eq!(bus.batches_published(), 1);
        assert_eq!(subscription.drain().len(), 1);
        assert_eq!(uow.pending_events(), 0);
    }

    #[tokio::test]
    async fn test_commit_without_events_skips_publish() {
        let (_, bus, mut uow) = setup();
        let ctx = Context::background();
        uow.begin(&ctx).await.unwrap();
        uow.commit(&ctx).await.unwrap();
        assert_eq!(bus.batches_published(), 0);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes_and_events() {
        let (store, bus, mut uow) = setup();
        let ctx = Context::background();
        let user = UserId::new("u1");

        uow.begin(&ctx).await.unwrap();
        let repos = uow.repositories().unwrap();
        let node = repos.nodes.save(&ctx, &Node::new(user.clone(), "a")).await.unwrap();
        uow.publish_event(created(&node)).unwrap();

        uow.rollback(&ctx).await.unwrap();
        uow.rollback(&ctx).await.unwrap();
        assert_eq!(uow.state(), UnitOfWorkState::RolledBack);
        assert_eq!(store.node_count(&user), 0);
        assert_eq!(store.open_transactions(), 0);
        assert_eq!(bus.batches_published(), 0);

        let err = uow.publish_event(created(&node)).unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_rollback_after_commit_is_noop() {
        let (store, _, mut uow) = setup();
        let ctx = Context::background();
        let user = UserId::new("u1");
        uow.begin(&ctx).await.unwrap();
        uow.repositories()
            .unwrap()
            .nodes
            .save(&ctx, &Node::new(user.clone(), "kept"))
            .await
            .unwrap();
        uow.commit(&ctx).await.unwrap();

        uow.rollback(&ctx).await.unwrap();
        assert_eq!(uow.state(), UnitOfWorkState::Committed);
        assert_eq!(store.node_count(&user), 1);
    }

    #[tokio::test]
    async fn test_storage_commit_failure_publishes_nothing() {
        let (store, bus, mut uow) = setup();
        let ctx = Context::background();
        let user = UserId::new("u1");
        store.fail_next_commit(RepositoryError::storage("disk full"));

        uow.begin(&ctx).await.unwrap();
        let node = uow
            .repositories()
            .unwrap()
            .nodes
            .save(&ctx, &Node::new(user.clone(), "a"))
            .await
            .unwrap();
        uow.publish_event(created(&node)).unwrap();

        let err = uow.commit(&ctx).await.unwrap_err();
        match err {
            RepositoryError::Transaction(tx) => {
                assert_eq!(tx.step, COMMIT_STEP);
                assert!(!tx.rollback_failed());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(uow.state(), UnitOfWorkState::RolledBack);
        assert_eq!(bus.batches_published(), 0);
        assert_eq!(store.node_count(&user), 0);
    }

    #[tokio::test]
    async fn test_publish_failure_is_reported() {
        let store = InMemoryStore::new();
        let publisher = Arc::new(FailingPublisher {
            attempts: AtomicU64::new(0),
        });
        let mut uow = UnitOfWork::over(store.clone(), publisher.clone());
        let ctx = Context::background();
        let user = UserId::new("u1");

        uow.begin(&ctx).await.unwrap();
        let node = uow
            .repositories()
            .unwrap()
            .nodes
            .save(&ctx, &Node::new(user.clone(), "a"))
            .await
            .unwrap();
        let event = created(&node);
        uow.publish_event(event.clone()).unwrap();

        let err = uow.commit(&ctx).await.unwrap_err();
        match err {
            RepositoryError::Transaction(tx) => assert_eq!(tx.step, PUBLISH_STEP),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(publisher.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(uow.state(), UnitOfWorkState::PublishFailed);
        // Storage had already committed.
        assert_eq!(store.node_count(&user), 1);
        assert_eq!(uow.undelivered_events(), &[event]);

        assert!(uow.retry_publish(&ctx).await.is_err());
        assert_eq!(publisher.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(uow.state(), UnitOfWorkState::PublishFailed);
        uow.rollback(&ctx).await.unwrap();
        assert_eq!(store.node_count(&user), 1);

        uow.reset().unwrap();
        assert!(uow.undelivered_events().is_empty());
    }

    /// Cancels the caller's context as soon as storage has committed.
    struct CancelOnCommit {
        inner: Arc<dyn Transaction>,
        cancel: CancelHandle,
    }

    #[async_trait]
    impl Transaction for CancelOnCommit {
        fn id(&self) -> &str {
            self.inner.id()
        }

        async fn commit(&self, ctx: &Context) -> RepositoryResult<()> {
            self.inner.commit(ctx).await?;
            self.cancel.cancel();
            Ok(())
        }

        async fn rollback(&self, ctx: &Context) -> RepositoryResult<()> {
            self.inner.rollback(ctx).await
        }

        fn is_active(&self) -> bool {
            self.inner.is_active()
        }
    }

    struct CancellingProvider {
        store: InMemoryStore,
        cancel: CancelHandle,
    }

    #[async_trait]
    impl TransactionProvider for CancellingProvider {
        async fn begin_transaction(&self, ctx: &Context) -> RepositoryResult<Arc<dyn Transaction>> {
            let inner = self.store.begin_transaction(ctx).await?;
            Ok(Arc::new(CancelOnCommit {
                inner,
                cancel: self.cancel.clone(),
            }))
        }
    }

    #[tokio::test]
    async fn test_events_published_when_cancelled_after_storage_commit() {
        let store = InMemoryStore::new();
        let bus = Arc::new(InMemoryEventBus::new());
        let (ctx, cancel) = Context::background().with_cancel();
        let provider = Arc::new(CancellingProvider {
            store: store.clone(),
            cancel,
        });
        let mut uow = UnitOfWork::new(provider, Arc::new(store.clone()), bus.clone());
        let user = UserId::new("u1");

        uow.begin(&ctx).await.unwrap();
        let node = uow
            .repositories()
            .unwrap()
            .nodes
            .save(&ctx, &Node::new(user.clone(), "a"))
            .await
            .unwrap();
        uow.publish_event(created(&node)).unwrap();

        uow.commit(&ctx).await.unwrap();
        assert!(ctx.is_cancelled());
        assert_eq!(uow.state(), UnitOfWorkState::Committed);
        assert_eq!(store.node_count(&user), 1);
        assert_eq!(bus.events_published(), 1);
    }

    #[tokio::test]
    async fn test_lifecycle_misuse() {
        let (_, _, mut uow) = setup();
        let ctx = Context::background();

        assert!(uow.repositories().is_err());
        assert!(matches!(
            uow.commit(&ctx).await,
            Err(RepositoryError::InvalidState { .. })
        ));

        uow.begin(&ctx).await.unwrap();
        assert!(uow.begin(&ctx).await.is_err());
        assert!(uow.reset().is_err());
        uow.rollback(&ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_allows_reuse() {
        let (store, bus, mut uow) = setup();
        let ctx = Context::background();
        let user = UserId::new("u1");

        for round in 0..3 {
            uow.reset().unwrap();
            assert_eq!(uow.state(), UnitOfWorkState::Created);
            assert_eq!(uow.pending_events(), 0);
            uow.begin(&ctx).await.unwrap();
            let node = uow
                .repositories()
                .unwrap()
                .nodes
                .save(&ctx, &Node::new(user.clone(), format!("round {round}")))
                .await
                .unwrap();
            uow.publish_event(created(&node)).unwrap();
            uow.commit(&ctx).await.unwrap();
        }
        assert_eq!(store.node_count(&user), 3);
        assert_eq!(bus.batches_published(), 3);
        assert_eq!(bus.events_published(), 3);
    }

    #[tokio::test]
    async fn test_run_commits_on_ok() {
        let (store, bus, mut uow) = setup();
        let ctx = Context::background();
        let user = UserId::new("u1");

        let node = uow
            .run(&ctx, |scope| {
                let ctx = ctx.clone();
                let user = user.clone();
                async move {
                    let node = scope
                        .repositories
                        .nodes
                        .save(&ctx, &Node::new(user, "inside run"))
                        .await?;
                    scope.publish(created(&node))?;
                    Ok::<_, RepositoryError>(node)
                }
            })
            .await
            .unwrap();

        assert_eq!(node.version, 1);
        assert_eq!(store.node_count(&user), 1);
        assert_eq!(bus.events_published(), 1);
    }

    #[tokio::test]
    async fn test_run_rolls_back_on_err() {
        let (store, bus, mut uow) = setup();
        let ctx = Context::background();
        let user = UserId::new("u1");

        let result: RepositoryResult<()> = uow
            .run(&ctx, |scope| {
                let ctx = ctx.clone();
                let user = user.clone();
                async move {
                    let node = scope
                        .repositories
                        .nodes
                        .save(&ctx, &Node::new(user, "doomed"))
                        .await?;
                    scope.publish(created(&node))?;
                    Err::<(), _>(RepositoryError::validation("content", "rejected by handler"))
                }
            })
            .await;

        assert!(matches!(result, Err(RepositoryError::Validation { .. })));
        assert_eq!(uow.state(), UnitOfWorkState::RolledBack);
        assert_eq!(store.node_count(&user), 0);
        assert_eq!(bus.events_published(), 0);
    }
}
