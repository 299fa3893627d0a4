//! In-memory store adapter.

mod query;
mod repositories;
mod store;

pub use repositories::{MemoryCategoryRepository, MemoryEdgeRepository, MemoryNodeRepository};
pub use store::{InMemoryStore, MemoryTransaction};
