//! Driven Ports (SPI - Outbound Dependencies)
//!
//! Both stores are process-wide shared state; implementations synchronize
//! internally and callers never lock them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_types::RepositoryResult;

use crate::domain::{IdempotencyKey, IdempotencyRecord};

/// Per-aggregate version numbers with compare-and-swap.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Current version; 0 for an aggregate that was never saved.
    async fn get_version(&self, aggregate_id: &str) -> RepositoryResult<u64>;

    /// Store `new` only if the stored version equals `expected`.
    ///
    /// Fails with `RepositoryError::VersionConflict` carrying the stored
    /// version when it does not. `new` must be `expected + 1`.
    async fn compare_and_swap(&self, aggregate_id: &str, expected: u64, new: u64)
        -> RepositoryResult<()>;
}

/// Results of idempotent operations keyed by [`IdempotencyKey`].
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn get(&self, key: &IdempotencyKey) -> RepositoryResult<Option<IdempotencyRecord>>;

    /// Insert `record` unless a record with the same key exists.
    ///
    /// Returns whichever record is stored afterwards, so concurrent
    /// duplicates all observe the first writer.
    async fn put_if_absent(&self, record: IdempotencyRecord) -> RepositoryResult<IdempotencyRecord>;

    /// Evict records created before `cutoff`; returns how many were removed.
    async fn cleanup(&self, cutoff: DateTime<Utc>) -> RepositoryResult<usize>;

    async fn record_count(&self) -> RepositoryResult<usize>;
}
