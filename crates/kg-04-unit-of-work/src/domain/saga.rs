//! Compensating transaction (saga).
//!
//! Each action yields a result that its own compensation needs, e.g. the id
//! of a record it created. On failure, completed actions are compensated in
//! reverse order; actions that never completed are not compensated.

use futures::future::{BoxFuture, FutureExt};
use shared_types::{Context, RepositoryError, RepositoryResult, StepFailure, TransactionError};
use std::any::Any;
use std::future::Future;
use tracing::{debug, warn};

type Erased = Box<dyn Any + Send>;
type ActionFn = Box<dyn FnOnce(Context) -> BoxFuture<'static, RepositoryResult<Erased>> + Send>;
type CompensateFn = Box<dyn FnOnce(Context, Erased) -> BoxFuture<'static, RepositoryResult<()>> + Send>;

struct SagaStep {
    name: String,
    action: ActionFn,
    compensate: CompensateFn,
}

#[derive(Default)]
pub struct CompensatingTransaction {
    steps: Vec<SagaStep>,
}

impl std::fmt::Debug for CompensatingTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.steps.iter().map(|s| &s.name))
            .finish()
    }
}

impl CompensatingTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an action whose result `T` is handed to its compensation.
    pub fn add_action<T, A, AFut, C, CFut>(
        &mut self,
        name: impl Into<String>,
        action: A,
        compensate: C,
    ) -> &mut Self
    where
        T: Send + 'static,
        A: FnOnce(Context) -> AFut + Send + 'static,
        AFut: Future<Output = RepositoryResult<T>> + Send + 'static,
        C: FnOnce(Context, T) -> CFut + Send + 'static,
        CFut: Future<Output = RepositoryResult<()>> + Send + 'static,
    {
        let name = name.into();
        let step_name = name.clone();
        self.steps.push(SagaStep {
            name,
            action: Box::new(move |ctx| {
                async move { action(ctx).await.map(|value| Box::new(value) as Erased) }.boxed()
            }),
            compensate: Box::new(move |ctx, result| {
                async move {
                    match result.downcast::<T>() {
                        Ok(value) => compensate(ctx, *value).await,
                        Err(_) => Err(RepositoryError::invalid_state(
                            format!("compensate {step_name}"),
                            "unexpected action result type",
                        )),
                    }
                }
                .boxed()
            }),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every action in order, compensating completed ones on failure.
    ///
    /// Returns the number of actions that completed.
    pub async fn execute(self, ctx: &Context) -> RepositoryResult<usize> {
        let mut completed: Vec<(String, CompensateFn, Erased)> = Vec::with_capacity(self.steps.len());

        for step in self.steps {
            let outcome = match ctx.check() {
                Ok(()) => (step.action)(ctx.clone()).await,
                Err(err) => Err(err),
            };

            match outcome {
                Ok(result) => {
                    debug!(action = %step.name, "Saga action completed");
                    completed.push((step.name, step.compensate, result));
                }
                Err(cause) => {
                    warn!(
                        action = %step.name,
                        error = %cause,
                        completed = completed.len(),
                        "Saga action failed, compensating"
                    );
                    let mut failures = Vec::new();
                    while let Some((name, compensate, result)) = completed.pop() {
                        match compensate(ctx.clone(), result).await {
                            Ok(()) => debug!(action = %name, "Saga action compensated"),
                            Err(error) => {
                                warn!(action = %name, error = %error, "Compensation failed");
                                failures.push(StepFailure {
                                    step: name,
                                    error: Box::new(error),
                                });
                            }
                        }
                    }
                    return Err(RepositoryError::Transaction(TransactionError {
                        step: step.name,
                        cause: Box::new(cause),
                        rollback_errors: failures,
                    }));
                }
            }
        }
        Ok(completed.len())
    }
}
