//! Bounded-concurrency batch execution with per-item outcomes.

use futures::stream::{self, StreamExt};
use shared_types::{Context, RepositoryError, RepositoryResult};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Items in flight at once.
    pub max_concurrency: usize,
    /// Skip items that have not started once any item fails.
    pub stop_on_error: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            stop_on_error: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome<T> {
    Succeeded(T),
    Failed(RepositoryError),
    /// Never started: the batch stopped or the context finished first.
    Skipped,
}

impl<T> ItemOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Succeeded(_))
    }
}

/// Outcomes in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport<T> {
    pub outcomes: Vec<ItemOutcome<T>>,
}

impl<T> BatchReport<T> {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ItemOutcome::Failed(_)))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ItemOutcome::Skipped))
            .count()
    }

    pub fn is_complete_success(&self) -> bool {
        self.outcomes.iter().all(ItemOutcome::is_success)
    }

    /// First failure in input order.
    pub fn first_error(&self) -> Option<&RepositoryError> {
        self.outcomes.iter().find_map(|o| match o {
            ItemOutcome::Failed(err) => Some(err),
            _ => None,
        })
    }

    /// All values, or the first failure. Skipped items count as cancelled.
    pub fn into_result(self) -> RepositoryResult<Vec<T>> {
        self.outcomes
            .into_iter()
            .map(|o| match o {
                ItemOutcome::Succeeded(value) => Ok(value),
                ItemOutcome::Failed(err) => Err(err),
                ItemOutcome::Skipped => Err(RepositoryError::Cancelled {
                    reason: "batch item skipped".to_string(),
                }),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchExecutor {
    config: BatchConfig,
}

impl BatchExecutor {
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Run `op` over `items` with at most `max_concurrency` in flight.
    pub async fn execute<I, T, F, Fut>(&self, ctx: &Context, items: Vec<I>, op: F) -> BatchReport<T>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = RepositoryResult<T>>,
    {
        let total = items.len();
        let stopped = AtomicBool::new(false);
        let stop_on_error = self.config.stop_on_error;
        let op = &op;
        let stopped_ref = &stopped;

        let mut indexed: Vec<(usize, ItemOutcome<T>)> = stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| async move {
                if stopped_ref.load(Ordering::SeqCst) || ctx.err().is_some() {
                    return (index, ItemOutcome::Skipped);
                }
                match op(item).await {
                    Ok(value) => (index, ItemOutcome::Succeeded(value)),
                    Err(err) => {
                        if stop_on_error {
                            stopped_ref.store(true, Ordering::SeqCst);
                        }
                        (index, ItemOutcome::Failed(err))
                    }
                }
            })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        indexed.sort_by_key(|(index, _)| *index);
        let report = BatchReport {
            outcomes: indexed.into_iter().map(|(_, outcome)| outcome).collect(),
        };

        if report.failed() > 0 {
            warn!(
                total,
                failed = report.failed(),
                skipped = report.skipped(),
                "Batch finished with failures"
            );
        } else {
            debug!(total, skipped = report.skipped(), "Batch finished");
        }
        report
    }
}
