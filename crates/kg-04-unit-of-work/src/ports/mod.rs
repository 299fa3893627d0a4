//! Ports Layer - store-facing and handler-facing contracts

pub mod outbound;
pub mod repository;

pub use outbound::{Transaction, TransactionProvider, TransactionalRepositoryFactory};
pub use repository::{CategoryRepository, EdgeRepository, NodeRepository, RepositorySet};
