//! Service Layer - optimistic locking and idempotent execution

pub mod idempotent;
pub mod optimistic;

pub use idempotent::{IdempotencyService, IdempotentOperation};
pub use optimistic::OptimisticLockManager;
