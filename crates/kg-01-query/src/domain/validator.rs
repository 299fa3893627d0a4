//! Optional pre-execution safety pass.

use regex::Regex;
use shared_types::{RepositoryError, RepositoryResult};

use super::builder::{Pagination, Query};
use super::filter::Operator;
use super::specification::Predicate;

/// Limits enforced by [`QueryValidator`].
#[derive(Debug, Clone)]
pub struct QueryLimits {
    pub min_limit: u32,
    pub max_limit: u32,
    pub sortable_fields: Vec<String>,
    pub max_depth: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            min_limit: 1,
            max_limit: 10_000,
            sortable_fields: [
                "created_at",
                "updated_at",
                "id",
                "content",
                "version",
                "strength",
                "level",
                "title",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_depth: 64,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryValidator {
    limits: QueryLimits,
}

impl QueryValidator {
    pub fn new(limits: QueryLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &QueryLimits {
        &self.limits
    }

    /// Check the query, returning the first violation.
    pub fn validate(&self, query: &Query) -> RepositoryResult<()> {
        if query.user_id.is_empty() {
            return Err(RepositoryError::validation("user_id", "user id is required"));
        }
        if !query.specification.is_scoped_to(&query.user_id) {
            return Err(RepositoryError::validation(
                "user_id",
                "query is not scoped to its user",
            ));
        }

        if query.limit < self.limits.min_limit || query.limit > self.limits.max_limit {
            return Err(RepositoryError::validation(
                "limit",
                format!(
                    "limit {} outside [{}, {}]",
                    query.limit, self.limits.min_limit, self.limits.max_limit
                ),
            ));
        }

        for key in &query.sort {
            if !self.limits.sortable_fields.iter().any(|f| f == &key.field) {
                return Err(RepositoryError::validation(
                    "sort",
                    format!("field '{}' is not sortable", key.field),
                ));
            }
        }

        if query.specification.depth() > self.limits.max_depth {
            return Err(RepositoryError::validation(
                "specification",
                format!("nesting deeper than {}", self.limits.max_depth),
            ));
        }

        for predicate in query.specification.predicates() {
            if let Predicate::Field(condition) = predicate {
                if condition.field.is_empty() {
                    return Err(RepositoryError::validation("filter", "empty field name"));
                }
                if condition.operator == Operator::Matches {
                    let pattern = condition.value.as_text().unwrap_or_default();
                    Regex::new(pattern).map_err(|e| {
                        RepositoryError::validation("filter", format!("invalid pattern: {e}"))
                    })?;
                }
            }
        }

        if let Pagination::Keyset { after } = &query.pagination {
            if after.is_empty() {
                return Err(RepositoryError::validation("pagination", "empty keyset"));
            }
        }

        if query.projection.iter().any(|f| f.is_empty()) {
            return Err(RepositoryError::validation("projection", "empty field name"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{QueryBuilder, SortDirection};
    use shared_types::UserId;

    fn builder() -> QueryBuilder {
        QueryBuilder::new(UserId::new("u1"))
    }

    #[test]
    fn test_valid_query() {
        let query = builder()
            .with_keyword("rust")
            .sort_by("updated_at", SortDirection::Ascending)
            .build_query();
        assert!(QueryValidator::default().validate(&query).is_ok());
    }

    #[test]
    fn test_user_required() {
        let query = QueryBuilder::new(UserId::new("")).build_query();
        let err = QueryValidator::default().validate(&query).unwrap_err();
        assert!(err.to_string().contains("user"));
    }

    #[test]
    fn test_limit_bounds() {
        let validator = QueryValidator::default();
        assert!(validator.validate(&builder().limit(0).build_query()).is_err());
        assert!(validator.validate(&builder().limit(10_000).build_query()).is_ok());
        assert!(validator.validate(&builder().limit(10_001).build_query()).is_err());
    }

    #[test]
    fn test_sort_allow_list() {
        let query = builder().sort_by("password", SortDirection::Ascending).build_query();
        assert!(QueryValidator::default().validate(&query).is_err());
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let query = builder()
            .where_field("content", Operator::Matches, "(unclosed")
            .build_query();
        assert!(QueryValidator::default().validate(&query).is_err());
    }
}
