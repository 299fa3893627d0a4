//! Adapters Layer - concrete stores behind the ports

pub mod memory;

pub use memory::{InMemoryStore, MemoryTransaction};
