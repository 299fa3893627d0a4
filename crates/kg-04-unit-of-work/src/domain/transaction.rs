//! # Transaction Manager
//!
//! Ordered steps with strict reverse-order rollback.
//!
//! ## State Machine (per step)
//!
//! ```text
//! [Pending] ──execute ok──→ [Executed] ──rollback──→ [RolledBack]
//!     │
//!     └── execute err ──→ [Failed]
//! ```
//!
//! `execute` runs every step still `Pending`, in registration order, so
//! steps can be appended between executions. The first failure rolls back
//! every `Executed` step, newest first. A step's rollback action is a
//! `FnOnce`, so it can run at most once however many times rollback is
//! requested.
//!
//! Detached steps run even after the caller's context is cancelled, with a
//! fresh background context. They are for work that must follow an
//! irreversible step once it has happened.

use futures::future::{BoxFuture, FutureExt};
use shared_types::{Context, RepositoryError, RepositoryResult, StepFailure, TransactionError};
use std::fmt;
use std::future::Future;
use tracing::{debug, warn};

type StepAction = Box<dyn FnOnce(Context) -> BoxFuture<'static, RepositoryResult<()>> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    Executed,
    Failed,
    RolledBack,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepState::Pending => write!(f, "pending"),
            StepState::Executed => write!(f, "executed"),
            StepState::Failed => write!(f, "failed"),
            StepState::RolledBack => write!(f, "rolled back"),
        }
    }
}

struct TransactionStep {
    name: String,
    execute: Option<StepAction>,
    rollback: Option<StepAction>,
    detached: bool,
    state: StepState,
}

fn boxed_action<F, Fut>(action: F) -> StepAction
where
    F: FnOnce(Context) -> Fut + Send + 'static,
    Fut: Future<Output = RepositoryResult<()>> + Send + 'static,
{
    Box::new(move |ctx| action(ctx).boxed())
}

#[derive(Default)]
pub struct TransactionManager {
    steps: Vec<TransactionStep>,
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.steps.iter().map(|s| (&s.name, s.state)))
            .finish()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step with its undo action.
    pub fn add_step<E, EFut, R, RFut>(
        &mut self,
        name: impl Into<String>,
        execute: E,
        rollback: R,
    ) -> &mut Self
    where
        E: FnOnce(Context) -> EFut + Send + 'static,
        EFut: Future<Output = RepositoryResult<()>> + Send + 'static,
        R: FnOnce(Context) -> RFut + Send + 'static,
        RFut: Future<Output = RepositoryResult<()>> + Send + 'static,
    {
        self.steps.push(TransactionStep {
            name: name.into(),
            execute: Some(boxed_action(execute)),
            rollback: Some(boxed_action(rollback)),
            detached: false,
            state: StepState::Pending,
        });
        self
    }

    /// Register a step that cannot be undone once it has run.
    pub fn add_irreversible_step<E, EFut>(&mut self, name: impl Into<String>, execute: E) -> &mut Self
    where
        E: FnOnce(Context) -> EFut + Send + 'static,
        EFut: Future<Output = RepositoryResult<()>> + Send + 'static,
    {
        self.steps.push(TransactionStep {
            name: name.into(),
            execute: Some(boxed_action(execute)),
            rollback: None,
            detached: false,
            state: StepState::Pending,
        });
        self
    }

    /// Register an irreversible step that ignores the caller's cancellation.
    pub fn add_detached_step<E, EFut>(&mut self, name: impl Into<String>, execute: E) -> &mut Self
    where
        E: FnOnce(Context) -> EFut + Send + 'static,
        EFut: Future<Output = RepositoryResult<()>> + Send + 'static,
    {
        self.steps.push(TransactionStep {
            name: name.into(),
            execute: Some(boxed_action(execute)),
            rollback: None,
            detached: true,
            state: StepState::Pending,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn step_state(&self, name: &str) -> Option<StepState> {
        self.steps.iter().find(|s| s.name == name).map(|s| s.state)
    }

    pub fn has_pending_steps(&self) -> bool {
        self.steps.iter().any(|s| s.state == StepState::Pending)
    }

    /// Run pending steps in order.
    ///
    /// On the first failure every executed step is rolled back, newest
    /// first, and the error names the failing step. Rollback failures are
    /// reported next to the original cause, never instead of it.
    pub async fn execute(&mut self, ctx: &Context) -> RepositoryResult<()> {
        for index in 0..self.steps.len() {
            let step = &mut self.steps[index];
            if step.state != StepState::Pending {
                continue;
            }
            let Some(action) = step.execute.take() else {
                continue;
            };

            let outcome = if step.detached {
                action(Context::background()).await
            } else {
                match ctx.check() {
                    Ok(()) => action(ctx.clone()).await,
                    Err(err) => Err(err),
                }
            };

            match outcome {
                Ok(()) => {
                    step.state = StepState::Executed;
                    debug!(step = %step.name, "Transaction step executed");
                }
                Err(cause) => {
                    step.state = StepState::Failed;
                    let failed = step.name.clone();
                    warn!(step = %failed, error = %cause, "Transaction step failed, rolling back");

                    let rollback_errors = self.rollback(ctx).await;
                    return Err(RepositoryError::Transaction(TransactionError {
                        step: failed,
                        cause: Box::new(cause),
                        rollback_errors,
                    }));
                }
            }
        }
        Ok(())
    }

    /// Undo every executed step, newest first.
    ///
    /// Safe to call repeatedly: a step is only ever rolled back once.
    /// Returns the failures of individual undo actions.
    pub async fn rollback(&mut self, ctx: &Context) -> Vec<StepFailure> {
        let mut failures = Vec::new();
        for step in self.steps.iter_mut().rev() {
            if step.state != StepState::Executed {
                continue;
            }
            step.state = StepState::RolledBack;
            let Some(undo) = step.rollback.take() else {
                debug!(step = %step.name, "Step has no rollback action");
                continue;
            };
            match undo(ctx.clone()).await {
                Ok(()) => debug!(step = %step.name, "Transaction step rolled back"),
                Err(error) => {
                    warn!(step = %step.name, error = %error, "Rollback of transaction step failed");
                    failures.push(StepFailure {
                        step: step.name.clone(),
                        error: Box::new(error),
                    });
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    type Log = Arc<Mutex<Vec<String>>>;

    fn record(log: &Log, entry: &str) -> impl FnOnce(Context) -> BoxFuture<'static, RepositoryResult<()>> {
        let log = log.clone();
        let entry = entry.to_string();
        move |_| {
            async move {
                log.lock().push(entry);
                Ok(())
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_all_steps_run_in_order() {
        let log: Log = Arc::default();
        let mut tm = TransactionManager::new();
        tm.add_step("a", record(&log, "exec a"), record(&log, "undo a"))
            .add_step("b", record(&log, "exec b"), record(&log, "undo b"));

        tm.execute(&Context::background()).await.unwrap();
        assert_eq!(*log.lock(), vec!["exec a", "exec b"]);
        assert_eq!(tm.step_state("b"), Some(StepState::Executed));
    }

    #[tokio::test]
    async fn test_failure_rolls_back_in_reverse() {
        let log: Log = Arc::default();
        let mut tm = TransactionManager::new();
        tm.add_step("a", record(&log, "exec a"), record(&log, "undo a"))
            .add_step("b", record(&log, "exec b"), record(&log, "undo b"))
            .add_step(
                "c",
                |_| async { Err(RepositoryError::storage("disk full")) },
                record(&log, "undo c"),
            );

        let err = tm.execute(&Context::background()).await.unwrap_err();
        assert_eq!(*log.lock(), vec!["exec a", "exec b", "undo b", "undo a"]);

        let RepositoryError::Transaction(tx) = err else {
            panic!("expected transaction error");
        };
        assert_eq!(tx.step, "c");
        assert!(tx.cause.to_string().contains("disk full"));
        assert!(!tx.rollback_failed());
        assert_eq!(tm.step_state("c"), Some(StepState::Failed));
    }

    #[tokio::test]
    async fn test_rollback_runs_once() {
        let log: Log = Arc::default();
        let mut tm = TransactionManager::new();
        tm.add_step("a", record(&log, "exec a"), record(&log, "undo a"));
        tm.execute(&Context::background()).await.unwrap();

        assert!(tm.rollback(&Context::background()).await.is_empty());
        assert!(tm.rollback(&Context::background()).await.is_empty());
        assert_eq!(*log.lock(), vec!["exec a", "undo a"]);
    }

    #[tokio::test]
    async fn test_rollback_errors_kept_apart_from_cause() {
        let mut tm = TransactionManager::new();
        tm.add_step(
            "a",
            |_| async { Ok(()) },
            |_| async { Err(RepositoryError::storage("undo a broke")) },
        )
        .add_step(
            "b",
            |_| async { Err(RepositoryError::validation("b", "bad")) },
            |_| async { Ok(()) },
        );

        let err = tm.execute(&Context::background()).await.unwrap_err();
        let RepositoryError::Transaction(tx) = err else {
            panic!("expected transaction error");
        };
        assert!(matches!(*tx.cause, RepositoryError::Validation { .. }));
        assert_eq!(tx.rollback_errors.len(), 1);
        assert_eq!(tx.rollback_errors[0].step, "a");
        let message = RepositoryError::Transaction(tx).to_string();
        assert!(message.contains("undo a broke"), "{message}");
    }

    #[tokio::test]
    async fn test_steps_appended_after_execute() {
        let log: Log = Arc::default();
        let mut tm = TransactionManager::new();
        tm.add_step("open", record(&log, "open"), record(&log, "close"));
        tm.execute(&Context::background()).await.unwrap();

        tm.add_irreversible_step("commit", |_| async {
            Err(RepositoryError::storage("commit refused"))
        });
        assert!(tm.has_pending_steps());
        assert!(tm.execute(&Context::background()).await.is_err());
        assert_eq!(*log.lock(), vec!["open", "close"]);
    }

    #[tokio::test]
    async fn test_cancelled_context_fails_pending_step() {
        let log: Log = Arc::default();
        let (ctx, cancel) = Context::background().with_cancel();
        let mut tm = TransactionManager::new();
        tm.add_step("a", record(&log, "exec a"), record(&log, "undo a"));
        cancel.cancel();

        let err = tm.execute(&ctx).await.unwrap_err();
        let RepositoryError::Transaction(tx) = err else {
            panic!("expected transaction error");
        };
        assert!(matches!(*tx.cause, RepositoryError::Cancelled { .. }));
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_detached_step_survives_cancellation() {
        let log: Log = Arc::default();
        let (ctx, cancel) = Context::background().with_cancel();
        let mut tm = TransactionManager::new();
        let cancel_after = log.clone();
        tm.add_irreversible_step("commit", move |_| async move {
            cancel_after.lock().push("commit".to_string());
            cancel.cancel();
            Ok(())
        })
        .add_detached_step("announce", {
            let log = log.clone();
            move |step_ctx: Context| async move {
                step_ctx.check()?;
                log.lock().push("announce".to_string());
                Ok(())
            }
        });

        tm.execute(&ctx).await.unwrap();
        assert!(ctx.is_cancelled());
        assert_eq!(*log.lock(), vec!["commit", "announce"]);
        assert_eq!(tm.step_state("announce"), Some(StepState::Executed));
    }
}
