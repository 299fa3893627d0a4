//! Adapters Layer - in-memory store implementations

pub mod memory;

pub use memory::{InMemoryIdempotencyStore, InMemoryVersionStore};
