//! # KG-02 Concurrency
//!
//! Safe mutation of shared aggregates under concurrent writers.
//!
//! ## Architecture
//!
//! - **Domain** (`domain/`): `Versioned`, conflict resolvers and the
//!   per-update-kind `ConflictPolicy`, idempotency keys and records
//! - **Ports** (`ports/`): `VersionStore`, `IdempotencyStore`
//! - **Adapters** (`adapters/`): in-memory implementations of both stores
//! - **Service** (`service/`): `OptimisticLockManager`, `IdempotencyService`
//!
//! ## Invariants
//!
//! - A stored version grows by exactly 1 per accepted compare-and-swap and
//!   never decreases.
//! - Of two concurrent writers presenting the same expected version, exactly
//!   one wins; the other receives `AggregateVersionError` with both versions.
//! - An idempotency key, once recorded, always yields the first result.
//!
//! ## Ordering with idempotency
//!
//! Callers that combine both check the idempotency record first and only
//! then take the optimistic lock; a replayed write never touches the
//! version store.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

pub use adapters::{InMemoryIdempotencyStore, InMemoryVersionStore};
pub use domain::*;
pub use ports::{IdempotencyStore, VersionStore};
pub use service::{IdempotencyService, IdempotentOperation, OptimisticLockManager};

/// Result alias for concurrency operations.
pub type ConcurrencyResult<T> = Result<T, shared_types::RepositoryError>;
