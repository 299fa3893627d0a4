//! Domain Layer - versions, conflict policies, idempotency keys
//!
//! RULES:
//! - No I/O operations
//! - No async code

pub mod idempotency;
pub mod versioning;

pub use idempotency::{
    canonical_json, generate_idempotency_key, IdempotencyConfig, IdempotencyKey, IdempotencyRecord,
};
pub use versioning::{
    ConflictPolicy, ConflictResolver, LastWriteWins, MergeResolver, UpdateKind, Versioned,
};
