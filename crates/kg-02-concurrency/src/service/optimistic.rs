//! Optimistic lock manager.

use shared_types::{AggregateVersionError, Context, RepositoryResult};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::Versioned;
use crate::ports::VersionStore;

/// Runs a save under compare-and-swap version control.
///
/// Version conflicts are returned, never retried here.
pub struct OptimisticLockManager {
    versions: Arc<dyn VersionStore>,
}

impl OptimisticLockManager {
    pub fn new(versions: Arc<dyn VersionStore>) -> Self {
        Self { versions }
    }

    pub fn version_store(&self) -> &Arc<dyn VersionStore> {
        &self.versions
    }

    /// Save `aggregate` and advance its version by one.
    ///
    /// 1. Reads the stored version.
    /// 2. Rejects the write if the aggregate claims a non-zero version that
    ///    differs from it.
    /// 3. Runs `save` with the version the aggregate will have afterwards.
    /// 4. Compare-and-swaps the stored version.
    ///
    /// If another writer wins between steps 1 and 4, the conflict is returned
    /// even though `save` already ran: the caller's write did not win.
    pub async fn save_with_optimistic_lock<A, F, Fut>(
        &self,
        ctx: &Context,
        aggregate: &A,
        save: F,
    ) -> RepositoryResult<u64>
    where
        A: Versioned + ?Sized,
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = RepositoryResult<()>>,
    {
        ctx.check()?;
        let aggregate_id = aggregate.aggregate_id().to_string();
        let current = self.versions.get_version(&aggregate_id).await?;
        let claimed = aggregate.version();

        if claimed != 0 && claimed != current {
            debug!(
                aggregate_id = %aggregate_id,
                claimed,
                current,
                "Rejecting stale write"
            );
            return Err(AggregateVersionError {
                aggregate_id,
                expected_version: claimed,
                actual_version: current,
            }
            .into());
        }

        let next = current + 1;
        save(next).await?;

        if let Err(err) = self
            .versions
            .compare_and_swap(&aggregate_id, current, next)
            .await
        {
            warn!(aggregate_id = %aggregate_id, error = %err, "Lost optimistic lock race");
            return Err(err);
        }

        debug!(aggregate_id = %aggregate_id, version = next, "Saved under optimistic lock");
        Ok(next)
    }
}
