//! Domain Layer - query composition
//!
//! - `specification`: predicate algebra over the sealed entity union
//! - `filter`: serializable storage-level mirror of a specification
//! - `options`: query options, sort keys, read preference
//! - `builder`: fluent, user-scoped `QueryBuilder` and the `Query` it yields
//! - `validator` / `optimizer`: optional safety and performance passes
//! - `cursor`: opaque pagination token codec and `Page<T>`
//!
//! RULES:
//! - No I/O operations
//! - No async code

pub mod builder;
pub mod cursor;
pub mod filter;
pub mod optimizer;
pub mod options;
pub mod specification;
pub mod validator;

pub use builder::{Aggregation, Pagination, Query, QueryBuilder};
pub use cursor::{decode_cursor, decode_envelope, encode_cursor, Page, PaginationCursor, ResumeKey};
pub use filter::{Bound, FieldCondition, Filter, LogicalOp, Operator, RangeFilter};
pub use optimizer::{reorder_by_selectivity, QueryOptimizer};
pub use options::{
    compare_entities, compare_sort_values, including_archived, including_deleted, with_cache, with_cursor,
    with_filter, with_limit, with_offset, with_projection, with_read_preference, with_sort,
    CacheHint, QueryOption, QueryOptions, ReadPreference, SortDirection, SortKey, DEFAULT_LIMIT,
};
pub use specification::{Predicate, Specification};
pub use validator::{QueryLimits, QueryValidator};
