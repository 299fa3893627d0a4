//! # KG-04 Unit of Work
//!
//! Atomic multi-entity writes for the knowledge graph, with domain events
//! published only after the storage transaction commits.
//!
//! ## Architecture
//!
//! - **Domain** (`domain/`): `TransactionManager` (ordered steps, reverse
//!   rollback) and `CompensatingTransaction` (saga)
//! - **Ports** (`ports/`): per-aggregate repositories, `TransactionProvider`,
//!   `TransactionalRepositoryFactory`
//! - **Adapters** (`adapters/`): `InMemoryStore`, a partitioned store with
//!   staged transactional writes
//! - **Service** (`service/`): `UnitOfWork`, the decorator chain and the
//!   consistency checker
//! - **Config** (`config`): `CoreConfig`, every tunable of the core in one
//!   value
//!
//! ## Invariants
//!
//! - Every read and write names its user; one user's partition is never
//!   visible through another user's calls.
//! - Writes made through a unit of work become visible all together at
//!   commit, or not at all.
//! - Events buffered in a unit of work are published at most once, after
//!   the storage commit. A failed commit publishes nothing.
//! - Rollback undoes completed steps in reverse order and reports every
//!   rollback failure next to the original error.
//!
//! ## Decorator order
//!
//! `DecoratorChain::standard` wraps as logging → metrics → caching →
//! resilience → store, so a retried call is logged and measured once.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod service;

pub use adapters::{InMemoryStore, MemoryTransaction};
pub use config::CoreConfig;
pub use domain::{CompensatingTransaction, StepState, TransactionManager};
pub use ports::{
    CategoryRepository, EdgeRepository, NodeRepository, RepositorySet, Transaction,
    TransactionProvider, TransactionalRepositoryFactory,
};
pub use service::{
    ConsistencyChecker, DecoratorChain, EventSink, RepositoryLayer, UnitOfWork, UnitOfWorkScope,
    UnitOfWorkState,
};

/// Result alias for unit-of-work operations.
pub type UnitOfWorkResult<T> = Result<T, shared_types::RepositoryError>;
