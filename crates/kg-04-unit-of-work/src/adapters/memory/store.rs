//! Partition-keyed in-memory store with staged transactions.
//!
//! Every user owns one partition. Writes made through a transaction are
//! staged as conditional `Put` / `Delete` operations and applied all-or-none
//! on commit; the conditions are re-checked against the committed state at
//! that point, so a concurrent writer that got there first causes the whole
//! batch to fail.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use shared_types::{
    AggregateVersionError, Category, CategoryId, Context, Edge, EdgeId, EntityKind, Node, NodeId,
    RepositoryError, RepositoryResult, UserId,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::repositories::{MemoryCategoryRepository, MemoryEdgeRepository, MemoryNodeRepository};
use crate::ports::{RepositorySet, Transaction, TransactionProvider, TransactionalRepositoryFactory};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StoredItem {
    Node(Node),
    Edge(Edge),
    Category(Category),
}

impl StoredItem {
    fn kind(&self) -> EntityKind {
        match self {
            StoredItem::Node(_) => EntityKind::Node,
            StoredItem::Edge(_) => EntityKind::Edge,
            StoredItem::Category(_) => EntityKind::Category,
        }
    }

    fn user_id(&self) -> &UserId {
        match self {
            StoredItem::Node(n) => &n.user_id,
            StoredItem::Edge(e) => &e.user_id,
            StoredItem::Category(c) => &c.user_id,
        }
    }

    fn id(&self) -> &str {
        match self {
            StoredItem::Node(n) => n.id.as_str(),
            StoredItem::Edge(e) => e.id.as_str(),
            StoredItem::Category(c) => c.id.as_str(),
        }
    }
}

/// Precondition attached to a single write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteCondition {
    NotExists,
    Exists,
    /// The stored item exists and carries this version.
    VersionEquals(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WriteOperation {
    Put {
        item: StoredItem,
        condition: WriteCondition,
    },
    Delete {
        kind: EntityKind,
        user_id: UserId,
        id: String,
        condition: WriteCondition,
    },
}

impl WriteOperation {
    pub fn put(item: StoredItem, condition: WriteCondition) -> Self {
        WriteOperation::Put { item, condition }
    }

    pub fn delete(kind: EntityKind, user_id: &UserId, id: &str) -> Self {
        WriteOperation::Delete {
            kind,
            user_id: user_id.clone(),
            id: id.to_string(),
            condition: WriteCondition::Exists,
        }
    }

    fn user_id(&self) -> &UserId {
        match self {
            WriteOperation::Put { item, .. } => item.user_id(),
            WriteOperation::Delete { user_id, .. } => user_id,
        }
    }
}

/// Everything one user owns.
#[derive(Debug, Clone, Default)]
pub(crate) struct Partition {
    pub nodes: BTreeMap<NodeId, Node>,
    pub edges: BTreeMap<EdgeId, Edge>,
    pub categories: BTreeMap<CategoryId, Category>,
}

impl Partition {
    /// Stored version, if the item exists. Unversioned kinds report 0.
    fn version_of(&self, kind: EntityKind, id: &str) -> Option<u64> {
        match kind {
            EntityKind::Node => self.nodes.get(id).map(|n| n.version),
            EntityKind::Edge => self.edges.get(id).map(|_| 0),
            EntityKind::Category => self.categories.get(id).map(|_| 0),
        }
    }

    fn check(&self, kind: EntityKind, id: &str, condition: WriteCondition) -> RepositoryResult<()> {
        let stored = self.version_of(kind, id);
        match (condition, stored) {
            (WriteCondition::NotExists, None) => Ok(()),
            (WriteCondition::NotExists, Some(_)) => Err(RepositoryError::Conflict {
                message: format!("{kind} {id} already exists"),
            }),
            (WriteCondition::Exists | WriteCondition::VersionEquals(_), None) => {
                Err(RepositoryError::not_found(kind.to_string(), id))
            }
            (WriteCondition::Exists, Some(_)) => Ok(()),
            (WriteCondition::VersionEquals(expected), Some(actual)) if expected == actual => Ok(()),
            (WriteCondition::VersionEquals(expected), Some(actual)) => Err(AggregateVersionError {
                aggregate_id: id.to_string(),
                expected_version: expected,
                actual_version: actual,
            }
            .into()),
        }
    }

    fn apply(&mut self, op: WriteOperation) -> RepositoryResult<()> {
        match &op {
            WriteOperation::Put { item, condition } => self.check(item.kind(), item.id(), *condition)?,
            WriteOperation::Delete {
                kind, id, condition, ..
            } => self.check(*kind, id, *condition)?,
        }
        self.apply_unchecked(op);
        Ok(())
    }

    fn apply_unchecked(&mut self, op: WriteOperation) {
        match op {
            WriteOperation::Put { item, .. } => match item {
                StoredItem::Node(n) => {
                    self.nodes.insert(n.id.clone(), n);
                }
                StoredItem::Edge(e) => {
                    self.edges.insert(e.id.clone(), e);
                }
                StoredItem::Category(c) => {
                    self.categories.insert(c.id.clone(), c);
                }
            },
            WriteOperation::Delete { kind, id, .. } => match kind {
                EntityKind::Node => {
                    self.nodes.remove(id.as_str());
                }
                EntityKind::Edge => {
                    self.edges.remove(id.as_str());
                }
                EntityKind::Category => {
                    self.categories.remove(id.as_str());
                }
            },
        }
    }
}

/// Which state a repository reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Scope {
    /// Committed state; every write is its own batch.
    Direct,
    /// Committed state overlaid with the transaction's staged writes.
    Transaction(String),
}

#[derive(Default)]
pub(crate) struct StoreInner {
    partitions: RwLock<HashMap<UserId, Partition>>,
    // Lock order: `staged` before `partitions`.
    staged: Mutex<HashMap<String, Vec<WriteOperation>>>,
    injected_commit_failures: Mutex<VecDeque<RepositoryError>>,
    commits: AtomicU64,
}

impl StoreInner {
    /// Run `f` over the user's partition as seen from `scope`.
    pub fn with_view<R>(
        &self,
        scope: &Scope,
        user_id: &UserId,
        f: impl FnOnce(&Partition) -> R,
    ) -> RepositoryResult<R> {
        match scope {
            Scope::Direct => {
                let partitions = self.partitions.read();
                match partitions.get(user_id) {
                    Some(partition) => Ok(f(partition)),
                    None => Ok(f(&Partition::default())),
                }
            }
            Scope::Transaction(id) => {
                let pending: Vec<WriteOperation> = {
                    let staged = self.staged.lock();
                    let ops = staged
                        .get(id)
                        .ok_or_else(|| RepositoryError::invalid_state("read", "transaction closed"))?;
                    ops.iter().filter(|op| op.user_id() == user_id).cloned().collect()
                };
                let mut view = self
                    .partitions
                    .read()
                    .get(user_id)
                    .cloned()
                    .unwrap_or_default();
                for op in pending {
                    view.apply_unchecked(op);
                }
                Ok(f(&view))
            }
        }
    }

    pub fn write(&self, scope: &Scope, ops: Vec<WriteOperation>) -> RepositoryResult<()> {
        match scope {
            Scope::Direct => self.apply_batch(ops),
            Scope::Transaction(id) => {
                let mut staged = self.staged.lock();
                let pending = staged
                    .get_mut(id)
                    .ok_or_else(|| RepositoryError::invalid_state("write", "transaction closed"))?;

                // Validate against committed state plus what is already staged.
                let partitions = self.partitions.read();
                let mut views: HashMap<UserId, Partition> = HashMap::new();
                for op in &ops {
                    let user_id = op.user_id();
                    if !views.contains_key(user_id) {
                        let mut view = partitions.get(user_id).cloned().unwrap_or_default();
                        for staged_op in pending.iter().filter(|s| s.user_id() == user_id) {
                            view.apply_unchecked(staged_op.clone());
                        }
                        views.insert(user_id.clone(), view);
                    }
                    if let Some(view) = views.get_mut(user_id) {
                        view.apply(op.clone())?;
                    }
                }
                pending.extend(ops);
                Ok(())
            }
        }
    }

    /// Apply `ops` all-or-none against committed state.
    fn apply_batch(&self, ops: Vec<WriteOperation>) -> RepositoryResult<()> {
        let mut partitions = self.partitions.write();
        let mut working: HashMap<UserId, Partition> = HashMap::new();
        for op in ops {
            let user_id = op.user_id().clone();
            let view = working
                .entry(user_id)
                .or_insert_with_key(|user_id| partitions.get(user_id).cloned().unwrap_or_default());
            view.apply(op)?;
        }
        for (user_id, partition) in working {
            partitions.insert(user_id, partition);
        }
        Ok(())
    }
}

/// Shared handle to an in-memory store.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<StoreInner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repositories writing straight to committed state.
    pub fn direct_repositories(&self) -> RepositorySet {
        self.repository_set(Scope::Direct)
    }

    /// Make the next commit fail with `error` without applying anything.
    pub fn fail_next_commit(&self, error: RepositoryError) {
        self.inner.injected_commit_failures.lock().push_back(error);
    }

    pub fn commit_count(&self) -> u64 {
        self.inner.commits.load(Ordering::SeqCst)
    }

    pub fn open_transactions(&self) -> usize {
        self.inner.staged.lock().len()
    }

    pub fn node_count(&self, user_id: &UserId) -> usize {
        self.inner
            .partitions
            .read()
            .get(user_id)
            .map(|p| p.nodes.len())
            .unwrap_or(0)
    }

    pub fn edge_count(&self, user_id: &UserId) -> usize {
        self.inner
            .partitions
            .read()
            .get(user_id)
            .map(|p| p.edges.len())
            .unwrap_or(0)
    }

    fn repository_set(&self, scope: Scope) -> RepositorySet {
        RepositorySet {
            nodes: Arc::new(MemoryNodeRepository::new(self.inner.clone(), scope.clone())),
            edges: Arc::new(MemoryEdgeRepository::new(self.inner.clone(), scope.clone())),
            categories: Arc::new(MemoryCategoryRepository::new(self.inner.clone(), scope)),
        }
    }
}

impl fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("commits", &self.commit_count())
            .field("open_transactions", &self.open_transactions())
            .finish()
    }
}

#[async_trait]
impl TransactionProvider for InMemoryStore {
    async fn begin_transaction(&self, ctx: &Context) -> RepositoryResult<Arc<dyn Transaction>> {
        ctx.check()?;
        let id = Uuid::new_v4().to_string();
        self.inner.staged.lock().insert(id.clone(), Vec::new());
        debug!(transaction_id = %id, "transaction opened");
        Ok(Arc::new(MemoryTransaction {
            id,
            inner: self.inner.clone(),
            state: Mutex::new(TxState::Active),
        }))
    }
}

impl TransactionalRepositoryFactory for InMemoryStore {
    fn repositories(&self, transaction: Arc<dyn Transaction>) -> RepositoryResult<RepositorySet> {
        if !transaction.is_active() {
            return Err(RepositoryError::invalid_state(
                "bind repositories",
                "transaction not active",
            ));
        }
        if !self.inner.staged.lock().contains_key(transaction.id()) {
            return Err(RepositoryError::invalid_state(
                "bind repositories",
                format!("unknown transaction {}", transaction.id()),
            ));
        }
        Ok(self.repository_set(Scope::Transaction(transaction.id().to_string())))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Active,
    Committed,
    RolledBack,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxState::Active => write!(f, "active"),
            TxState::Committed => write!(f, "committed"),
            TxState::RolledBack => write!(f, "rolled back"),
        }
    }
}

pub struct MemoryTransaction {
    id: String,
    inner: Arc<StoreInner>,
    state: Mutex<TxState>,
}

impl fmt::Debug for MemoryTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransaction")
            .field("id", &self.id)
            .field("state", &*self.state.lock())
            .finish()
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    async fn commit(&self, ctx: &Context) -> RepositoryResult<()> {
        ctx.check()?;
        let mut state = self.state.lock();
        if *state != TxState::Active {
            return Err(RepositoryError::invalid_state("commit", *state));
        }

        let ops = self.inner.staged.lock().remove(&self.id).unwrap_or_default();
        if let Some(error) = self.inner.injected_commit_failures.lock().pop_front() {
            *state = TxState::RolledBack;
            warn!(transaction_id = %self.id, error = %error, "commit failed");
            return Err(error);
        }

        let writes = ops.len();
        match self.inner.apply_batch(ops) {
            Ok(()) => {
                *state = TxState::Committed;
                self.inner.commits.fetch_add(1, Ordering::SeqCst);
                debug!(transaction_id = %self.id, writes, "transaction committed");
                Ok(())
            }
            Err(error) => {
                *state = TxState::RolledBack;
                warn!(transaction_id = %self.id, error = %error, "commit rejected");
                Err(error)
            }
        }
    }

    async fn rollback(&self, _ctx: &Context) -> RepositoryResult<()> {
        let mut state = self.state.lock();
        if *state != TxState::Active {
            return Ok(());
        }
        self.inner.staged.lock().remove(&self.id);
        *state = TxState::RolledBack;
        debug!(transaction_id = %self.id, "transaction rolled back");
        Ok(())
    }

    fn is_active(&self) -> bool {
        *self.state.lock() == TxState::Active
    }
}
