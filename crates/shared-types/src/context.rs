//! # Request Context
//!
//! Cancellation and deadline propagation for every blocking point in the
//! repository core (connection acquisition, token waits, retry backoff).
//!
//! A `Context` is cheap to clone. Children created with [`Context::with_cancel`]
//! or [`Context::with_timeout`] observe every ancestor's cancellation and the
//! earliest deadline in the chain.

use crate::errors::RepositoryError;
use futures::future::{select_all, BoxFuture, FutureExt};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why a context is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    Cancelled,
    DeadlineExceeded,
}

impl std::fmt::Display for ContextError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextError::Cancelled => write!(f, "context cancelled"),
            ContextError::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

impl From<ContextError> for RepositoryError {
    fn from(err: ContextError) -> Self {
        RepositoryError::Cancelled {
            reason: err.to_string(),
        }
    }
}

/// Handle that cancels the context it was created with (and its children).
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: std::sync::Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Cancellation/deadline scope passed to every operation.
#[derive(Debug, Clone, Default)]
pub struct Context {
    signals: Vec<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl Context {
    /// Root context: never cancelled, no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Child context with its own cancel handle.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let (sender, receiver) = watch::channel(false);
        let mut signals = self.signals.clone();
        signals.push(receiver);
        (
            Self {
                signals,
                deadline: self.deadline,
            },
            CancelHandle {
                sender: std::sync::Arc::new(sender),
            },
        )
    }

    /// Child context that expires at `deadline` (or earlier if the parent does).
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Self {
            signals: self.signals.clone(),
            deadline: Some(deadline),
        }
    }

    /// Child context that expires after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, if any.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.signals.iter().any(|rx| *rx.borrow())
    }

    /// `Some` once the context is cancelled or past its deadline.
    pub fn err(&self) -> Option<ContextError> {
        if self.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Fail fast if the context is already done.
    pub fn check(&self) -> Result<(), RepositoryError> {
        match self.err() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Resolve once the context is cancelled or its deadline passes.
    ///
    /// Never resolves for a background context.
    pub async fn done(&self) -> ContextError {
        let cancelled = self.cancelled();
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = cancelled => ContextError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
                }
            }
            None => {
                cancelled.await;
                ContextError::Cancelled
            }
        }
    }

    fn cancelled(&self) -> BoxFuture<'static, ()> {
        if self.signals.is_empty() {
            return futures::future::pending().boxed();
        }
        let waits: Vec<BoxFuture<'static, ()>> = self
            .signals
            .iter()
            .cloned()
            .map(|mut rx| {
                async move {
                    loop {
                        if *rx.borrow_and_update() {
                            return;
                        }
                        // A dropped handle can no longer cancel.
                        if rx.changed().await.is_err() {
                            futures::future::pending::<()>().await;
                        }
                    }
                }
                .boxed()
            })
            .collect();
        select_all(waits).map(|_| ()).boxed()
    }

    /// Run `fut` unless the context finishes first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, RepositoryError>
    where
        F: std::future::Future<Output = Result<T, RepositoryError>>,
    {
        self.check()?;
        tokio::select! {
            res = fut => res,
            err = self.done() => Err(err.into()),
        }
    }
}
