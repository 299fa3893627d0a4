//! Fluent query builder.
//!
//! Every builder starts from `owned_by(user)`; there is no way to construct
//! an unscoped query through it.
//!
//! ```ignore
//! let query = QueryBuilder::new(user_id)
//!     .with_keyword("rust")
//!     .created_after(last_week)
//!     .sort_by("updated_at", SortDirection::Descending)
//!     .limit(20)
//!     .cursor(token)
//!     .build_query();
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared_types::{FieldValue, UserId};

use super::cursor::ResumeKey;
use super::filter::{Filter, Operator};
use super::options::{
    ReadPreference, SortDirection, SortKey, DEFAULT_LIMIT, DEFAULT_SORT_FIELD,
};
use super::specification::Specification;

/// Pagination style. Setting one replaces any other.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "style", rename_all = "snake_case")]
pub enum Pagination {
    #[default]
    FirstPage,
    Offset { offset: u32 },
    Cursor { token: String },
    /// Resume strictly after the given key values.
    Keyset { after: ResumeKey },
}

/// Aggregation descriptor. Adapters honor these when they can.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "function", content = "field", rename_all = "snake_case")]
pub enum Aggregation {
    Count,
    Sum(String),
    Avg(String),
    Min(String),
    Max(String),
    GroupBy(String),
}

/// Everything an adapter needs to execute a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub user_id: UserId,
    pub specification: Specification,
    pub sort: Vec<SortKey>,
    pub pagination: Pagination,
    pub limit: u32,
    pub projection: Vec<String>,
    pub aggregations: Vec<Aggregation>,
    pub read_preference: ReadPreference,
    pub include_archived: bool,
}

impl Query {
    pub fn filter(&self) -> Filter {
        self.specification.to_filter()
    }

    /// Sort keys, falling back to `created_at` descending.
    pub fn effective_sort(&self) -> Vec<SortKey> {
        if self.sort.is_empty() {
            vec![SortKey::descending(DEFAULT_SORT_FIELD)]
        } else {
            self.sort.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryBuilder {
    user_id: UserId,
    specification: Specification,
    sort: Vec<SortKey>,
    pagination: Pagination,
    limit: u32,
    projection: Vec<String>,
    aggregations: Vec<Aggregation>,
    read_preference: ReadPreference,
    include_archived: bool,
}

impl QueryBuilder {
    pub fn new(user_id: UserId) -> Self {
        Self {
            specification: Specification::owned_by(user_id.clone()),
            user_id,
            sort: Vec::new(),
            pagination: Pagination::FirstPage,
            limit: DEFAULT_LIMIT,
            projection: Vec::new(),
            aggregations: Vec::new(),
            read_preference: ReadPreference::Primary,
            include_archived: false,
        }
    }

    /// AND an arbitrary specification into the query.
    pub fn matching(mut self, spec: &Specification) -> Self {
        self.specification = self.specification.and(spec);
        self
    }

    pub fn with_keyword(self, keyword: impl Into<String>) -> Self {
        self.matching(&Specification::keyword_contains(keyword))
    }

    /// Entity must carry at least one of `keywords`.
    pub fn with_any_keyword<I, S>(self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let any = keywords
            .into_iter()
            .fold(Specification::None, |acc, k| acc.or(&Specification::keyword_contains(k)));
        self.matching(&any)
    }

    pub fn with_tag(self, tag: impl Into<String>) -> Self {
        self.matching(&Specification::tag_contains(tag))
    }

    pub fn with_content(self, text: impl Into<String>) -> Self {
        self.matching(&Specification::content_contains(text))
    }

    pub fn created_after(self, at: DateTime<Utc>) -> Self {
        self.matching(&Specification::created_after(at))
    }

    pub fn created_before(self, at: DateTime<Utc>) -> Self {
        self.matching(&Specification::created_before(at))
    }

    pub fn created_between(self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.matching(&Specification::created_between(start, end))
    }

    pub fn where_field(
        self,
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<FieldValue>,
    ) -> Self {
        self.matching(&Specification::field(field, operator, value))
    }

    /// Add a sort key; earlier calls have higher priority.
    pub fn sort_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push(SortKey::new(field, direction));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.pagination = Pagination::Offset { offset };
        self
    }

    /// Resume from an opaque token. An empty token means the first page.
    pub fn cursor(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.pagination = if token.is_empty() {
            Pagination::FirstPage
        } else {
            Pagination::Cursor { token }
        };
        self
    }

    pub fn keyset(mut self, after: ResumeKey) -> Self {
        self.pagination = Pagination::Keyset { after };
        self
    }

    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn aggregate(mut self, aggregation: Aggregation) -> Self {
        self.aggregations.push(aggregation);
        self
    }

    pub fn read_preference(mut self, preference: ReadPreference) -> Self {
        self.read_preference = preference;
        self
    }

    pub fn include_archived(mut self, include: bool) -> Self {
        self.include_archived = include;
        self
    }

    /// The composed specification, always scoped to the builder's user.
    pub fn build(self) -> Specification {
        self.specification
    }

    pub fn build_query(self) -> Query {
        Query {
            user_id: self.user_id,
            specification: self.specification,
            sort: self.sort,
            pagination: self.pagination,
            limit: self.limit,
            projection: self.projection,
            aggregations: self.aggregations,
            read_preference: self.read_preference,
            include_archived: self.include_archived,
        }
    }
}
