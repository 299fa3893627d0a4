//! # Outbound Ports (Driven Ports)
//!
//! What the Unit of Work needs from the underlying store.

use async_trait::async_trait;
use shared_types::{Context, RepositoryResult};
use std::sync::Arc;

use super::repository::RepositorySet;

/// The store's native transaction or batch-write handle.
#[async_trait]
pub trait Transaction: Send + Sync {
    fn id(&self) -> &str;

    /// Atomically apply everything written through this transaction.
    async fn commit(&self, ctx: &Context) -> RepositoryResult<()>;

    /// Discard everything written through this transaction.
    ///
    /// A no-op once the transaction is no longer active.
    async fn rollback(&self, ctx: &Context) -> RepositoryResult<()>;

    fn is_active(&self) -> bool;
}

#[async_trait]
pub trait TransactionProvider: Send + Sync {
    async fn begin_transaction(&self, ctx: &Context) -> RepositoryResult<Arc<dyn Transaction>>;
}

/// Mints repositories whose writes go through a given transaction.
pub trait TransactionalRepositoryFactory: Send + Sync {
    fn repositories(&self, transaction: Arc<dyn Transaction>) -> RepositoryResult<RepositorySet>;
}
