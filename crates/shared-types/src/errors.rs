//! # Error Types
//!
//! The error taxonomy shared by every repository-core crate.
//!
//! Upstream handlers always receive one of these kinds; a failure that can
//! be classified is never surfaced as a bare string.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Optimistic-lock conflict: the caller's write did not win.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("version conflict on aggregate {aggregate_id}: expected {expected_version}, actual {actual_version}")]
pub struct AggregateVersionError {
    pub aggregate_id: String,
    pub expected_version: u64,
    pub actual_version: u64,
}

/// Class of a transient store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    /// Provisioned throughput exceeded / request limit exceeded.
    Throttled,
    /// The store did not answer in time.
    Timeout,
    /// Internal server error on the store side.
    InternalServer,
    /// Store temporarily unavailable.
    Unavailable,
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransientKind::Throttled => write!(f, "throttled"),
            TransientKind::Timeout => write!(f, "timeout"),
            TransientKind::InternalServer => write!(f, "internal server error"),
            TransientKind::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// A single failed rollback or compensation.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    pub step: String,
    pub error: Box<RepositoryError>,
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.error)
    }
}

/// Failure of a multi-step transaction.
///
/// The original cause and any rollback failures are kept apart so neither
/// hides the other.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionError {
    /// Name of the step whose execution failed.
    pub step: String,
    /// The failure that triggered rollback.
    pub cause: Box<RepositoryError>,
    /// Failures raised while undoing already-executed steps.
    pub rollback_errors: Vec<StepFailure>,
}

impl TransactionError {
    pub fn new(step: impl Into<String>, cause: RepositoryError) -> Self {
        Self {
            step: step.into(),
            cause: Box::new(cause),
            rollback_errors: Vec::new(),
        }
    }

    pub fn rollback_failed(&self) -> bool {
        !self.rollback_errors.is_empty()
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transaction failed at step '{}': {}", self.step, self.cause)?;
        if !self.rollback_errors.is_empty() {
            let joined: Vec<String> = self.rollback_errors.iter().map(|e| e.to_string()).collect();
            write!(f, "; rollback errors: [{}]", joined.join("; "))?;
        }
        Ok(())
    }
}

impl std::error::Error for TransactionError {}

/// Kind of inconsistency found by the consistency checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptionKind {
    /// Edge references a node that does not exist.
    OrphanedEdge,
    /// A bidirectional edge is missing its reverse direction.
    MissingReverseEdge,
    /// A node carries an empty or malformed keyword.
    InvalidKeyword,
}

/// One consistency-checker finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptionFinding {
    pub kind: CorruptionKind,
    pub entity_id: String,
    pub detail: String,
}

impl fmt::Display for CorruptionFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} on {}: {}", self.kind, self.entity_id, self.detail)
    }
}

/// Errors returned by the repository core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RepositoryError {
    /// Bad input shape or range.
    #[error("validation failed for {field}: {message}")]
    Validation { field: String, message: String },

    /// Entity does not exist (or is not visible to this user).
    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    /// Optimistic-lock conflict.
    #[error(transparent)]
    VersionConflict(#[from] AggregateVersionError),

    /// Any other conflict (duplicate create, idempotency mismatch).
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Transient store failure that is safe to retry.
    #[error("transient store error ({kind}): {message}")]
    Transient { kind: TransientKind, message: String },

    /// Explicit marker that the wrapped error may be retried.
    #[error("retryable: {source}")]
    Retryable { source: Box<RepositoryError> },

    /// Retries were exhausted.
    #[error("operation failed after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        last: Box<RepositoryError>,
    },

    /// Local rate limiter refused the call.
    #[error("rate limit exceeded for {resource}")]
    RateLimited { resource: String },

    /// Connection or operation timeout.
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// Caller cancelled the operation.
    #[error("operation cancelled: {reason}")]
    Cancelled { reason: String },

    /// Circuit breaker rejected the call without invoking it.
    #[error("circuit breaker '{name}' is open")]
    CircuitOpen { name: String },

    /// Multi-step transaction failed.
    #[error(transparent)]
    Transaction(TransactionError),

    /// Consistency-checker findings.
    #[error("data corruption detected: {} finding(s)", .findings.len())]
    DataCorruption { findings: Vec<CorruptionFinding> },

    /// Lifecycle misuse (e.g. repository access outside an active unit of work).
    #[error("invalid state for {operation}: {state}")]
    InvalidState { operation: String, state: String },

    /// Encoding or decoding failed.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// Non-transient storage failure.
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        RepositoryError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>, id: impl fmt::Display) -> Self {
        RepositoryError::NotFound {
            resource: resource.into(),
            id: id.to_string(),
        }
    }

    pub fn transient(kind: TransientKind, message: impl Into<String>) -> Self {
        RepositoryError::Transient {
            kind,
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        RepositoryError::Storage {
            message: message.into(),
        }
    }

    pub fn invalid_state(operation: impl Into<String>, state: impl fmt::Display) -> Self {
        RepositoryError::InvalidState {
            operation: operation.into(),
            state: state.to_string(),
        }
    }

    /// Mark an error as retryable.
    pub fn retryable(self) -> Self {
        RepositoryError::Retryable {
            source: Box::new(self),
        }
    }

    /// Whether the resilience layer may retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RepositoryError::Retryable { .. }
                | RepositoryError::Transient { .. }
                | RepositoryError::Timeout { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            RepositoryError::VersionConflict(_) | RepositoryError::Conflict { .. }
        )
    }

    /// The version conflict carried by this error, looking through wrappers.
    pub fn version_conflict(&self) -> Option<&AggregateVersionError> {
        match self {
            RepositoryError::VersionConflict(e) => Some(e),
            RepositoryError::Retryable { source } => source.version_conflict(),
            RepositoryError::RetryExhausted { last, .. } => last.version_conflict(),
            RepositoryError::Transaction(tx) => tx.cause.version_conflict(),
            _ => None,
        }
    }
}

impl From<TransactionError> for RepositoryError {
    fn from(err: TransactionError) -> Self {
        RepositoryError::Transaction(err)
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization {
            message: err.to_string(),
        }
    }
}

/// Result alias used across the repository core.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(RepositoryError::transient(TransientKind::Throttled, "slow down").is_retryable());
        assert!(RepositoryError::storage("disk").retryable().is_retryable());
        assert!(!RepositoryError::validation("limit", "too big").is_retryable());
        assert!(!RepositoryError::VersionConflict(AggregateVersionError {
            aggregate_id: "n1".into(),
            expected_version: 1,
            actual_version: 2,
        })
        .is_retryable());
    }

    #[test]
    fn test_transaction_error_reports_both_failures() {
        let mut err = TransactionError::new("publish events", RepositoryError::storage("bus down"));
        err.rollback_errors.push(StepFailure {
            step: "database transaction".into(),
            error: Box::new(RepositoryError::storage("rollback refused")),
        });

        let msg = err.to_string();
        assert!(msg.contains("publish events"));
        assert!(msg.contains("bus down"));
        assert!(msg.contains("rollback refused"));
        assert!(err.rollback_failed());
    }

    #[test]
    fn test_version_conflict_lookup_through_wrappers() {
        let conflict = AggregateVersionError {
            aggregate_id: "n1".into(),
            expected_version: 3,
            actual_version: 4,
        };
        let wrapped = RepositoryError::Transaction(TransactionError::new(
            "save",
            RepositoryError::VersionConflict(conflict.clone()),
        ));
        assert_eq!(wrapped.version_conflict(), Some(&conflict));
        assert!(conflict.to_string().contains("expected 3, actual 4"));
    }
}
