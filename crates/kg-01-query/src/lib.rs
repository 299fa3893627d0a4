//! # KG-01 Query
//!
//! Declarative queries over the knowledge graph.
//!
//! ## Architecture
//!
//! Pure domain crate, no ports:
//!
//! - `Specification`: immutable predicate tree with `and` / `or` / `not`,
//!   in-memory evaluation and translation to a storage `Filter`
//! - `QueryBuilder`: fluent accumulator that always starts from
//!   `owned_by(user)`
//! - `QueryValidator`, `QueryOptimizer`: optional passes before execution
//! - Cursor codec: opaque base64 tokens wrapping a storage resume key
//!
//! ## Invariants
//!
//! - Every query produced by `QueryBuilder` is scoped to one user.
//! - `spec.is_satisfied_by(e) == spec.to_filter().matches(e)` for every entity.
//! - `decode_cursor(&encode_cursor(&k)?)? == Some(k)` for any non-empty key.
//!
//! ## Usage Example
//!
//! ```ignore
//! use kg_01_query::{QueryBuilder, QueryValidator, QueryOptimizer};
//!
//! let query = QueryBuilder::new(user_id).with_keyword("rust").limit(20).build_query();
//! QueryValidator::default().validate(&query)?;
//! let query = QueryOptimizer::default().optimize(query);
//! ```

pub mod domain;

pub use domain::*;

/// Result alias for query operations.
pub type QueryResult<T> = Result<T, shared_types::RepositoryError>;
