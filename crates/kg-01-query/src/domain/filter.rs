//! Serializable filter tree.
//!
//! A `Filter` is what a storage adapter receives. It mirrors the shape of the
//! `Specification` it was produced from node for node, and can also be
//! evaluated in memory with [`Filter::matches`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use shared_types::{AsEntityRef, EntityRef, FieldValue};
use std::cmp::Ordering;
use std::fmt;

/// Comparison operator of a field filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Case-insensitive substring for text, membership for lists.
    Contains,
    StartsWith,
    EndsWith,
    /// Value must be a `FieldValue::List` of candidates.
    In,
    /// Value must be a two-element `FieldValue::List` `[low, high]`, inclusive.
    Between,
    IsNull,
    /// Value must be a text regular expression.
    Matches,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Contains => "contains",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
            Operator::In => "in",
            Operator::Between => "between",
            Operator::IsNull => "is_null",
            Operator::Matches => "matches",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `field <operator> value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCondition {
    pub field: String,
    pub operator: Operator,
    pub value: FieldValue,
}

impl FieldCondition {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<FieldValue>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Evaluate against an entity. A field the entity kind does not have
    /// never matches, whatever the operator.
    pub fn evaluate(&self, entity: EntityRef<'_>) -> bool {
        let Some(actual) = entity.field_value(&self.field) else {
            return false;
        };
        let ordering = actual.compare(&self.value);

        match self.operator {
            Operator::Eq => actual.loosely_equals(&self.value),
            Operator::Ne => !actual.loosely_equals(&self.value),
            Operator::Gt => ordering == Some(Ordering::Greater),
            Operator::Gte => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            Operator::Lt => ordering == Some(Ordering::Less),
            Operator::Lte => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            Operator::Contains => contains(&actual, &self.value),
            Operator::StartsWith => text_pair(&actual, &self.value)
                .map(|(a, v)| a.starts_with(v))
                .unwrap_or(false),
            Operator::EndsWith => text_pair(&actual, &self.value)
                .map(|(a, v)| a.ends_with(v))
                .unwrap_or(false),
            Operator::In => match &self.value {
                FieldValue::List(candidates) => candidates.iter().any(|c| actual.loosely_equals(c)),
                _ => false,
            },
            Operator::Between => match &self.value {
                FieldValue::List(bounds) if bounds.len() == 2 => {
                    matches!(
                        actual.compare(&bounds[0]),
                        Some(Ordering::Greater | Ordering::Equal)
                    ) && matches!(
                        actual.compare(&bounds[1]),
                        Some(Ordering::Less | Ordering::Equal)
                    )
                }
                _ => false,
            },
            Operator::IsNull => actual.is_null(),
            Operator::Matches => match (actual.as_text(), self.value.as_text()) {
                (Some(text), Some(pattern)) => Regex::new(pattern)
                    .map(|re| re.is_match(text))
                    .unwrap_or(false),
                _ => false,
            },
        }
    }
}

fn text_pair<'a>(actual: &'a FieldValue, value: &'a FieldValue) -> Option<(&'a str, &'a str)> {
    Some((actual.as_text()?, value.as_text()?))
}

/// Case-insensitive text equality; everything else uses loose equality.
pub(crate) fn element_matches(item: &FieldValue, needle: &FieldValue) -> bool {
    match (item.as_text(), needle.as_text()) {
        (Some(a), Some(b)) => a.to_lowercase() == b.to_lowercase(),
        _ => item.loosely_equals(needle),
    }
}

fn contains(actual: &FieldValue, needle: &FieldValue) -> bool {
    match actual {
        FieldValue::Text(text) => needle
            .as_text()
            .map(|n| text.to_lowercase().contains(&n.to_lowercase()))
            .unwrap_or(false),
        FieldValue::List(items) => items.iter().any(|item| element_matches(item, needle)),
        _ => false,
    }
}

/// One end of a range filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub value: FieldValue,
    pub inclusive: bool,
}

impl Bound {
    pub fn inclusive(value: impl Into<FieldValue>) -> Self {
        Self {
            value: value.into(),
            inclusive: true,
        }
    }

    pub fn exclusive(value: impl Into<FieldValue>) -> Self {
        Self {
            value: value.into(),
            inclusive: false,
        }
    }
}

/// `lower < field < upper`, either end optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeFilter {
    pub field: String,
    pub lower: Option<Bound>,
    pub upper: Option<Bound>,
}

impl RangeFilter {
    pub fn evaluate(&self, entity: EntityRef<'_>) -> bool {
        let Some(actual) = entity.field_value(&self.field) else {
            return false;
        };
        let above = match &self.lower {
            None => true,
            Some(bound) => match actual.compare(&bound.value) {
                Some(Ordering::Greater) => true,
                Some(Ordering::Equal) => bound.inclusive,
                _ => false,
            },
        };
        let below = match &self.upper {
            None => true,
            Some(bound) => match actual.compare(&bound.value) {
                Some(Ordering::Less) => true,
                Some(Ordering::Equal) => bound.inclusive,
                _ => false,
            },
        };
        above && below
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOp {
    And,
    Or,
    Not,
}

/// Storage-level filter node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Filter {
    Field(FieldCondition),
    /// Case-insensitive full-text containment on one field.
    Text { field: String, query: String },
    Range(RangeFilter),
    /// `And` of no filters is always true, `Or` of none is always false,
    /// `Not` is true when none of its filters match.
    Logical { op: LogicalOp, filters: Vec<Filter> },
}

impl Filter {
    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::Logical {
            op: LogicalOp::And,
            filters,
        }
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Logical {
            op: LogicalOp::Or,
            filters,
        }
    }

    pub fn not(filter: Filter) -> Self {
        Filter::Logical {
            op: LogicalOp::Not,
            filters: vec![filter],
        }
    }

    /// In-memory evaluation, used by the in-memory store adapter.
    pub fn matches<E: AsEntityRef + ?Sized>(&self, entity: &E) -> bool {
        self.matches_ref(entity.as_entity_ref())
    }

    fn matches_ref(&self, entity: EntityRef<'_>) -> bool {
        match self {
            Filter::Field(condition) => condition.evaluate(entity),
            Filter::Text { field, query } => entity
                .field_value(field)
                .and_then(|v| v.as_text().map(|t| t.to_lowercase().contains(&query.to_lowercase())))
                .unwrap_or(false),
            Filter::Range(range) => range.evaluate(entity),
            Filter::Logical { op, filters } => match op {
                LogicalOp::And => filters.iter().all(|f| f.matches_ref(entity)),
                LogicalOp::Or => filters.iter().any(|f| f.matches_ref(entity)),
                LogicalOp::Not => !filters.iter().any(|f| f.matches_ref(entity)),
            },
        }
    }

    /// Number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        match self {
            Filter::Logical { filters, .. } => 1 + filters.iter().map(Filter::node_count).sum::<usize>(),
            _ => 1,
        }
    }
}
