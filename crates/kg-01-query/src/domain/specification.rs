//! # Specification Engine
//!
//! Immutable, composable predicates over the closed entity set.
//!
//! ## Algebra
//!
//! - `a.and(b)`, `a.or(b)` and `a.not()` return new nodes; `self` is untouched.
//! - `All` and `None` are the identities of `and` and `or`.
//! - `a.not().not()` collapses back to `a`.
//!
//! ## Selectivity
//!
//! Each node carries an estimated fraction of entities it admits, derived
//! from its children: `and` multiplies, `or` uses inclusion-exclusion, `not`
//! inverts. Estimates only order conjuncts and feed `explain()`; they never
//! change which entities match.

use chrono::{DateTime, Utc};
use shared_types::{AsEntityRef, CategoryId, EntityRef, FieldValue, NodeId, UserId};
use std::fmt;
use std::sync::Arc;

use super::filter::{element_matches, Bound, FieldCondition, Filter, Operator, RangeFilter};

/// Leaf predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    OwnedBy(UserId),
    /// Node keyword equality, case-insensitive.
    KeywordContains(String),
    /// Node tag equality, case-insensitive.
    TagContains(String),
    /// Case-insensitive substring of node content.
    ContentContains(String),
    CreatedAfter(DateTime<Utc>),
    CreatedBefore(DateTime<Utc>),
    /// Inclusive on both ends.
    CreatedBetween(DateTime<Utc>, DateTime<Utc>),
    Archived(bool),
    Field(FieldCondition),
    /// Edge touching the node on either end.
    ConnectedTo(NodeId),
    StrengthAtLeast(f64),
    CategoryLevel(u32),
    ChildOf(CategoryId),
}

impl Predicate {
    pub fn is_satisfied_by(&self, entity: EntityRef<'_>) -> bool {
        match self {
            Predicate::OwnedBy(user) => entity.user_id() == user,
            Predicate::CreatedAfter(at) => entity.created_at() > *at,
            Predicate::CreatedBefore(at) => entity.created_at() < *at,
            Predicate::CreatedBetween(start, end) => {
                let created = entity.created_at();
                created >= *start && created <= *end
            }
            Predicate::Field(condition) => condition.evaluate(entity),

            Predicate::KeywordContains(keyword) => match entity {
                EntityRef::Node(node) => {
                    let needle = FieldValue::Text(keyword.clone());
                    node.keywords
                        .iter()
                        .any(|k| element_matches(&FieldValue::Text(k.clone()), &needle))
                }
                EntityRef::Edge(_) | EntityRef::Category(_) => false,
            },
            Predicate::TagContains(tag) => match entity {
                EntityRef::Node(node) => {
                    let needle = FieldValue::Text(tag.clone());
                    node.tags
                        .iter()
                        .any(|t| element_matches(&FieldValue::Text(t.clone()), &needle))
                }
                EntityRef::Edge(_) | EntityRef::Category(_) => false,
            },
            Predicate::ContentContains(text) => match entity {
                EntityRef::Node(node) => node.content.to_lowercase().contains(&text.to_lowercase()),
                EntityRef::Edge(_) | EntityRef::Category(_) => false,
            },
            Predicate::Archived(archived) => match entity {
                EntityRef::Node(node) => node.archived == *archived,
                EntityRef::Edge(_) | EntityRef::Category(_) => false,
            },

            Predicate::ConnectedTo(node_id) => match entity {
                EntityRef::Edge(edge) => edge.connects(node_id),
                EntityRef::Node(_) | EntityRef::Category(_) => false,
            },
            Predicate::StrengthAtLeast(min) => match entity {
                EntityRef::Edge(edge) => edge.strength >= *min,
                EntityRef::Node(_) | EntityRef::Category(_) => false,
            },

            Predicate::CategoryLevel(level) => match entity {
                EntityRef::Category(category) => category.level == *level,
                EntityRef::Node(_) | EntityRef::Edge(_) => false,
            },
            Predicate::ChildOf(parent) => match entity {
                EntityRef::Category(category) => category.parent_id.as_ref() == Some(parent),
                EntityRef::Node(_) | EntityRef::Edge(_) => false,
            },
        }
    }

    pub fn to_filter(&self) -> Filter {
        match self {
            Predicate::OwnedBy(user) => {
                Filter::Field(FieldCondition::new("user_id", Operator::Eq, user.as_str()))
            }
            Predicate::KeywordContains(k) => {
                Filter::Field(FieldCondition::new("keywords", Operator::Contains, k.as_str()))
            }
            Predicate::TagContains(t) => {
                Filter::Field(FieldCondition::new("tags", Operator::Contains, t.as_str()))
            }
            Predicate::ContentContains(text) => Filter::Text {
                field: "content".to_string(),
                query: text.clone(),
            },
            Predicate::CreatedAfter(at) => Filter::Range(RangeFilter {
                field: "created_at".to_string(),
                lower: Some(Bound::exclusive(*at)),
                upper: None,
            }),
            Predicate::CreatedBefore(at) => Filter::Range(RangeFilter {
                field: "created_at".to_string(),
                lower: None,
                upper: Some(Bound::exclusive(*at)),
            }),
            Predicate::CreatedBetween(start, end) => Filter::Range(RangeFilter {
                field: "created_at".to_string(),
                lower: Some(Bound::inclusive(*start)),
                upper: Some(Bound::inclusive(*end)),
            }),
            Predicate::Archived(archived) => {
                Filter::Field(FieldCondition::new("archived", Operator::Eq, *archived))
            }
            Predicate::Field(condition) => Filter::Field(condition.clone()),
            Predicate::ConnectedTo(node_id) => Filter::or(vec![
                Filter::Field(FieldCondition::new("source_id", Operator::Eq, node_id.as_str())),
                Filter::Field(FieldCondition::new("target_id", Operator::Eq, node_id.as_str())),
            ]),
            Predicate::StrengthAtLeast(min) => Filter::Range(RangeFilter {
                field: "strength".to_string(),
                lower: Some(Bound::inclusive(*min)),
                upper: None,
            }),
            Predicate::CategoryLevel(level) => Filter::Field(FieldCondition::new(
                "level",
                Operator::Eq,
                i64::from(*level),
            )),
            Predicate::ChildOf(parent) => {
                Filter::Field(FieldCondition::new("parent_id", Operator::Eq, parent.as_str()))
            }
        }
    }

    /// Estimated fraction of entities admitted.
    pub fn selectivity(&self) -> f64 {
        match self {
            Predicate::OwnedBy(_) => 0.05,
            Predicate::KeywordContains(_) => 0.1,
            Predicate::TagContains(_) => 0.15,
            Predicate::ContentContains(_) => 0.2,
            Predicate::CreatedAfter(_) | Predicate::CreatedBefore(_) => 0.5,
            Predicate::CreatedBetween(..) => 0.25,
            Predicate::Archived(true) => 0.1,
            Predicate::Archived(false) => 0.9,
            Predicate::ConnectedTo(_) => 0.05,
            Predicate::StrengthAtLeast(min) => (1.0 - min).clamp(0.0, 1.0),
            Predicate::CategoryLevel(_) => 0.2,
            Predicate::ChildOf(_) => 0.1,
            Predicate::Field(condition) => match condition.operator {
                Operator::Eq => 0.1,
                Operator::Ne => 0.9,
                Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => 0.33,
                Operator::Contains => 0.2,
                Operator::StartsWith | Operator::EndsWith => 0.15,
                Operator::In => match &condition.value {
                    FieldValue::List(items) => (0.1 * items.len() as f64).min(1.0),
                    _ => 0.1,
                },
                Operator::Between => 0.25,
                Operator::IsNull => 0.05,
                Operator::Matches => 0.25,
            },
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::OwnedBy(user) => write!(f, "owned_by({user})"),
            Predicate::KeywordContains(k) => write!(f, "keyword_contains({k})"),
            Predicate::TagContains(t) => write!(f, "tag_contains({t})"),
            Predicate::ContentContains(c) => write!(f, "content_contains({c})"),
            Predicate::CreatedAfter(at) => write!(f, "created_after({})", at.to_rfc3339()),
            Predicate::CreatedBefore(at) => write!(f, "created_before({})", at.to_rfc3339()),
            Predicate::CreatedBetween(s, e) => {
                write!(f, "created_between({}, {})", s.to_rfc3339(), e.to_rfc3339())
            }
            Predicate::Archived(a) => write!(f, "archived({a})"),
            Predicate::Field(c) => write!(f, "{} {} {:?}", c.field, c.operator, c.value),
            Predicate::ConnectedTo(id) => write!(f, "connected_to({id})"),
            Predicate::StrengthAtLeast(min) => write!(f, "strength_at_least({min})"),
            Predicate::CategoryLevel(level) => write!(f, "category_level({level})"),
            Predicate::ChildOf(parent) => write!(f, "child_of({parent})"),
        }
    }
}

/// Node of the specification expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Specification {
    /// Matches every entity.
    All,
    /// Matches no entity.
    None,
    Leaf(Predicate),
    And(Arc<Specification>, Arc<Specification>),
    Or(Arc<Specification>, Arc<Specification>),
    Not(Arc<Specification>),
}

impl Default for Specification {
    fn default() -> Self {
        Specification::All
    }
}

impl From<Predicate> for Specification {
    fn from(predicate: Predicate) -> Self {
        Specification::Leaf(predicate)
    }
}

impl Specification {
    pub fn owned_by(user: UserId) -> Self {
        Predicate::OwnedBy(user).into()
    }

    pub fn keyword_contains(keyword: impl Into<String>) -> Self {
        Predicate::KeywordContains(keyword.into()).into()
    }

    pub fn tag_contains(tag: impl Into<String>) -> Self {
        Predicate::TagContains(tag.into()).into()
    }

    pub fn content_contains(text: impl Into<String>) -> Self {
        Predicate::ContentContains(text.into()).into()
    }

    pub fn created_after(at: DateTime<Utc>) -> Self {
        Predicate::CreatedAfter(at).into()
    }

    pub fn created_before(at: DateTime<Utc>) -> Self {
        Predicate::CreatedBefore(at).into()
    }

    pub fn created_between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Predicate::CreatedBetween(start, end).into()
    }

    pub fn archived(archived: bool) -> Self {
        Predicate::Archived(archived).into()
    }

    pub fn field(field: impl Into<String>, operator: Operator, value: impl Into<FieldValue>) -> Self {
        Predicate::Field(FieldCondition::new(field, operator, value)).into()
    }

    pub fn connected_to(node_id: NodeId) -> Self {
        Predicate::ConnectedTo(node_id).into()
    }

    pub fn strength_at_least(min: f64) -> Self {
        Predicate::StrengthAtLeast(min).into()
    }

    pub fn category_level(level: u32) -> Self {
        Predicate::CategoryLevel(level).into()
    }

    pub fn child_of(parent: CategoryId) -> Self {
        Predicate::ChildOf(parent).into()
    }

    pub fn and(&self, other: &Specification) -> Specification {
        match (self, other) {
            (Specification::None, _) | (_, Specification::None) => Specification::None,
            (Specification::All, x) | (x, Specification::All) => x.clone(),
            (a, b) => Specification::And(Arc::new(a.clone()), Arc::new(b.clone())),
        }
    }

    pub fn or(&self, other: &Specification) -> Specification {
        match (self, other) {
            (Specification::All, _) | (_, Specification::All) => Specification::All,
            (Specification::None, x) | (x, Specification::None) => x.clone(),
            (a, b) => Specification::Or(Arc::new(a.clone()), Arc::new(b.clone())),
        }
    }

    pub fn not(&self) -> Specification {
        match self {
            Specification::All => Specification::None,
            Specification::None => Specification::All,
            Specification::Not(inner) => inner.as_ref().clone(),
            other => Specification::Not(Arc::new(other.clone())),
        }
    }

    pub fn is_satisfied_by<E: AsEntityRef + ?Sized>(&self, entity: &E) -> bool {
        self.evaluate(entity.as_entity_ref())
    }

    fn evaluate(&self, entity: EntityRef<'_>) -> bool {
        match self {
            Specification::All => true,
            Specification::None => false,
            Specification::Leaf(predicate) => predicate.is_satisfied_by(entity),
            Specification::And(a, b) => a.evaluate(entity) && b.evaluate(entity),
            Specification::Or(a, b) => a.evaluate(entity) || b.evaluate(entity),
            Specification::Not(inner) => !inner.evaluate(entity),
        }
    }

    /// Storage-level translation, one filter node per specification node.
    pub fn to_filter(&self) -> Filter {
        match self {
            Specification::All => Filter::and(Vec::new()),
            Specification::None => Filter::or(Vec::new()),
            Specification::Leaf(predicate) => predicate.to_filter(),
            Specification::And(a, b) => Filter::and(vec![a.to_filter(), b.to_filter()]),
            Specification::Or(a, b) => Filter::or(vec![a.to_filter(), b.to_filter()]),
            Specification::Not(inner) => Filter::not(inner.to_filter()),
        }
    }

    pub fn selectivity(&self) -> f64 {
        match self {
            Specification::All => 1.0,
            Specification::None => 0.0,
            Specification::Leaf(predicate) => predicate.selectivity(),
            Specification::And(a, b) => a.selectivity() * b.selectivity(),
            Specification::Or(a, b) => {
                let (sa, sb) = (a.selectivity(), b.selectivity());
                sa + sb - sa * sb
            }
            Specification::Not(inner) => 1.0 - inner.selectivity(),
        }
    }

    /// Flatten a chain of `And` nodes into its conjuncts, left to right.
    pub fn conjuncts(&self) -> Vec<&Specification> {
        match self {
            Specification::And(a, b) => {
                let mut out = a.conjuncts();
                out.extend(b.conjuncts());
                out
            }
            other => vec![other],
        }
    }

    /// Whether the top-level conjunction pins the query to `user`.
    pub fn is_scoped_to(&self, user: &UserId) -> bool {
        self.conjuncts().into_iter().any(|c| {
            matches!(c, Specification::Leaf(Predicate::OwnedBy(owner)) if owner == user)
        })
    }

    /// Visit every leaf predicate.
    pub fn predicates(&self) -> Vec<&Predicate> {
        match self {
            Specification::All | Specification::None => Vec::new(),
            Specification::Leaf(p) => vec![p],
            Specification::And(a, b) | Specification::Or(a, b) => {
                let mut out = a.predicates();
                out.extend(b.predicates());
                out
            }
            Specification::Not(inner) => inner.predicates(),
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            Specification::All | Specification::None | Specification::Leaf(_) => 1,
            Specification::And(a, b) | Specification::Or(a, b) => 1 + a.depth().max(b.depth()),
            Specification::Not(inner) => 1 + inner.depth(),
        }
    }

    /// Indented tree with per-node selectivity.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        self.explain_into(&mut out, 0);
        out
    }

    fn explain_into(&self, out: &mut String, indent: usize) {
        let pad = "  ".repeat(indent);
        let label = match self {
            Specification::All => "ALL".to_string(),
            Specification::None => "NONE".to_string(),
            Specification::Leaf(p) => p.to_string(),
            Specification::And(..) => "AND".to_string(),
            Specification::Or(..) => "OR".to_string(),
            Specification::Not(_) => "NOT".to_string(),
        };
        out.push_str(&format!("{pad}{label} (selectivity={:.4})\n", self.selectivity()));
        match self {
            Specification::And(a, b) | Specification::Or(a, b) => {
                a.explain_into(out, indent + 1);
                b.explain_into(out, indent + 1);
            }
            Specification::Not(inner) => inner.explain_into(out, indent + 1),
            _ => {}
        }
    }
}
