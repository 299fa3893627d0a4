//! Ports Layer - storage seams for versions and idempotency records

pub mod outbound;

pub use outbound::{IdempotencyStore, VersionStore};
