//! Query options and sort ordering.
//!
//! `QueryOptions` is assembled from functional options:
//!
//! ```ignore
//! let options = QueryOptions::from_options(vec![
//!     with_limit(20),
//!     with_sort("updated_at", SortDirection::Ascending),
//!     with_projection(["id", "content"]),
//! ]);
//! ```

use serde::{Deserialize, Serialize};
use shared_types::{AsEntityRef, EntityRef, FieldValue};
use std::cmp::Ordering;
use std::time::Duration;

use super::filter::Filter;

/// Page size used when a caller does not set one.
pub const DEFAULT_LIMIT: u32 = 50;

/// Field every query is sorted by unless told otherwise.
pub const DEFAULT_SORT_FIELD: &str = "created_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Descending)
    }

    pub fn ascending(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Ascending)
    }
}

/// Order two entities by `keys` in priority order, then by id.
///
/// Missing fields order like `Null`, before every value; see
/// [`FieldValue::sort_cmp`] for the rest of the order.
pub fn compare_entities<A, B>(keys: &[SortKey], a: &A, b: &B) -> Ordering
where
    A: AsEntityRef + ?Sized,
    B: AsEntityRef + ?Sized,
{
    let (a, b) = (a.as_entity_ref(), b.as_entity_ref());
    for key in keys {
        let ordering = compare_field(&key.field, a, b);
        let ordering = match key.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.id().cmp(b.id())
}

fn compare_field(field: &str, a: EntityRef<'_>, b: EntityRef<'_>) -> Ordering {
    compare_sort_values(a.field_value(field).as_ref(), b.field_value(field).as_ref())
}

/// Ascending order of two sort values, a missing value counting as `Null`.
pub fn compare_sort_values(a: Option<&FieldValue>, b: Option<&FieldValue>) -> Ordering {
    let null = FieldValue::Null;
    a.unwrap_or(&null).sort_cmp(b.unwrap_or(&null))
}

/// Where reads may be served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadPreference {
    #[default]
    Primary,
    Secondary,
    Nearest,
}

/// Advisory caching hint for the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheHint {
    pub enabled: bool,
    pub ttl: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    pub limit: u32,
    pub offset: Option<u32>,
    pub cursor: Option<String>,
    pub sort: Vec<SortKey>,
    pub filters: Vec<Filter>,
    pub cache: CacheHint,
    pub read_preference: ReadPreference,
    /// Empty means every field.
    pub projection: Vec<String>,
    pub include_archived: bool,
    pub include_deleted: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: None,
            cursor: None,
            sort: vec![SortKey::descending(DEFAULT_SORT_FIELD)],
            filters: Vec::new(),
            cache: CacheHint::default(),
            read_preference: ReadPreference::Primary,
            projection: Vec::new(),
            include_archived: false,
            include_deleted: false,
        }
    }
}

/// A functional option over [`QueryOptions`].
pub type QueryOption = Box<dyn FnOnce(&mut QueryOptions) + Send>;

impl QueryOptions {
    pub fn from_options(options: impl IntoIterator<Item = QueryOption>) -> Self {
        let mut query_options = Self::default();
        for option in options {
            option(&mut query_options);
        }
        query_options
    }

    /// Combined filter of every entry in `filters`.
    pub fn combined_filter(&self) -> Filter {
        Filter::and(self.filters.clone())
    }
}

pub fn with_limit(limit: u32) -> QueryOption {
    Box::new(move |o| o.limit = limit)
}

pub fn with_offset(offset: u32) -> QueryOption {
    Box::new(move |o| {
        o.offset = Some(offset);
        o.cursor = None;
    })
}

pub fn with_cursor(cursor: impl Into<String>) -> QueryOption {
    let cursor = cursor.into();
    Box::new(move |o| {
        o.cursor = Some(cursor);
        o.offset = None;
    })
}

/// Replace the default sort on first use, then append in priority order.
pub fn with_sort(field: impl Into<String>, direction: SortDirection) -> QueryOption {
    let key = SortKey::new(field, direction);
    Box::new(move |o| {
        if o.sort == vec![SortKey::descending(DEFAULT_SORT_FIELD)] {
            o.sort.clear();
        }
        o.sort.push(key);
    })
}

pub fn with_filter(filter: Filter) -> QueryOption {
    Box::new(move |o| o.filters.push(filter))
}

pub fn with_cache(ttl: Duration) -> QueryOption {
    Box::new(move |o| {
        o.cache = CacheHint {
            enabled: true,
            ttl: Some(ttl),
        }
    })
}

pub fn with_read_preference(preference: ReadPreference) -> QueryOption {
    Box::new(move |o| o.read_preference = preference)
}

pub fn with_projection<I, S>(fields: I) -> QueryOption
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
    Box::new(move |o| o.projection = fields)
}

pub fn including_archived() -> QueryOption {
    Box::new(|o| o.include_archived = true)
}

pub fn including_deleted() -> QueryOption {
    Box::new(|o| o.include_deleted = true)
}
