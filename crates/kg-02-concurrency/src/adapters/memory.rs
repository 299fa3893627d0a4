//! In-memory version and idempotency stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use shared_types::{AggregateVersionError, RepositoryError, RepositoryResult};
use std::collections::HashMap;

use crate::domain::{IdempotencyKey, IdempotencyRecord};
use crate::ports::{IdempotencyStore, VersionStore};

#[derive(Debug, Default)]
pub struct InMemoryVersionStore {
    versions: RwLock<HashMap<String, u64>>,
}

impl InMemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an aggregate at `version`, as if it had been written that many times.
    pub fn with_version(self, aggregate_id: impl Into<String>, version: u64) -> Self {
        self.versions.write().insert(aggregate_id.into(), version);
        self
    }

    pub fn tracked_aggregates(&self) -> usize {
        self.versions.read().len()
    }
}

#[async_trait]
impl VersionStore for InMemoryVersionStore {
    async fn get_version(&self, aggregate_id: &str) -> RepositoryResult<u64> {
        Ok(self.versions.read().get(aggregate_id).copied().unwrap_or(0))
    }

    async fn compare_and_swap(
        &self,
        aggregate_id: &str,
        expected: u64,
        new: u64,
    ) -> RepositoryResult<()> {
        if expected.checked_add(1) != Some(new) {
            return Err(RepositoryError::validation(
                "version",
                format!("new version {new} must follow expected version {expected}"),
            ));
        }

        let mut versions = self.versions.write();
        let actual = versions.get(aggregate_id).copied().unwrap_or(0);
        if actual != expected {
            return Err(AggregateVersionError {
                aggregate_id: aggregate_id.to_string(),
                expected_version: expected,
                actual_version: actual,
            }
            .into());
        }
        versions.insert(aggregate_id.to_string(), new);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    records: RwLock<HashMap<IdempotencyKey, IdempotencyRecord>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &IdempotencyKey) -> RepositoryResult<Option<IdempotencyRecord>> {
        Ok(self.records.read().get(key).cloned())
    }

    async fn put_if_absent(&self, record: IdempotencyRecord) -> RepositoryResult<IdempotencyRecord> {
        let mut records = self.records.write();
        let stored = records.entry(record.key.clone()).or_insert(record);
        Ok(stored.clone())
    }

    async fn cleanup(&self, cutoff: DateTime<Utc>) -> RepositoryResult<usize> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, record| record.created_at >= cutoff);
        Ok(before - records.len())
    }

    async fn record_count(&self) -> RepositoryResult<usize> {
        Ok(self.records.read().len())
    }
}
