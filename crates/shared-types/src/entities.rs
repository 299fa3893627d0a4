//! # Core Domain Entities
//!
//! The three aggregate kinds persisted by the repository core, plus the
//! sealed [`EntityRef`] union that specifications and filters evaluate
//! against.
//!
//! ## Clusters
//!
//! - **Graph**: `Node`, `Edge`
//! - **Taxonomy**: `Category`
//! - **Field access**: `FieldValue`, `EntityRef::field_value`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new identifier from any string-like value.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Generate a fresh random identifier.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// Borrow the raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the identifier is empty (never valid for persisted data).
            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Owner of every persisted entity. All reads and writes are scoped by it.
    UserId
);
string_id!(
    /// Identifier of a memory node.
    NodeId
);
string_id!(
    /// Identifier of an edge between two nodes.
    EdgeId
);
string_id!(
    /// Identifier of a category.
    CategoryId
);

// =============================================================================
// CLUSTER A: THE GRAPH
// =============================================================================

/// A memory node: the primary versioned aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub user_id: UserId,
    pub content: String,
    pub keywords: Vec<String>,
    pub tags: Vec<String>,
    /// Free-form string metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub archived: bool,
    /// Optimistic-concurrency version; 0 for a node that was never saved.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// Create a fresh, never-persisted node owned by `user_id`.
    pub fn new(user_id: UserId, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: NodeId::generate(),
            user_id,
            content: content.into(),
            keywords: Vec::new(),
            tags: Vec::new(),
            metadata: BTreeMap::new(),
            archived: false,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: NodeId) -> Self {
        self.id = id;
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self.updated_at = at;
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }
}

/// A directed, weighted link between two nodes of the same user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub user_id: UserId,
    pub source_id: NodeId,
    pub target_id: NodeId,
    /// Connection strength in [0, 1].
    pub strength: f64,
    pub created_at: DateTime<Utc>,
}

impl Edge {
    pub fn new(user_id: UserId, source_id: NodeId, target_id: NodeId, strength: f64) -> Self {
        Self {
            id: EdgeId::generate(),
            user_id,
            source_id,
            target_id,
            strength,
            created_at: Utc::now(),
        }
    }

    /// Whether this edge touches `node_id` at either end.
    pub fn connects(&self, node_id: &NodeId) -> bool {
        &self.source_id == node_id || &self.target_id == node_id
    }
}

// =============================================================================
// CLUSTER B: TAXONOMY
// =============================================================================

/// A hierarchical category grouping nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub user_id: UserId,
    pub title: String,
    pub description: String,
    /// Depth in the hierarchy; 0 for root categories.
    pub level: u32,
    pub parent_id: Option<CategoryId>,
    pub created_at: DateTime<Utc>,
}

impl Category {
    pub fn new(user_id: UserId, title: impl Into<String>) -> Self {
        Self {
            id: CategoryId::generate(),
            user_id,
            title: title.into(),
            description: String::new(),
            level: 0,
            parent_id: None,
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// CLUSTER C: FIELD ACCESS
// =============================================================================

/// A typed field value, used by generic field filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Time(DateTime<Utc>),
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Order two scalar values of compatible types.
    ///
    /// Ints and floats compare numerically; mismatched kinds are unordered.
    pub fn compare(&self, other: &FieldValue) -> Option<std::cmp::Ordering> {
        use FieldValue::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a.partial_cmp(b),
            (Int(a), Int(b)) => a.partial_cmp(b),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Int(a), Float(b)) => (*a as f64).partial_cmp(b),
            (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)),
            (Text(a), Text(b)) => a.partial_cmp(b),
            (Time(a), Time(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    /// Total order used for sorting.
    ///
    /// Kinds rank `Null < Bool < number < Text < Time < List`. Numbers
    /// compare numerically with `f64::total_cmp`; ties between an int and a
    /// float put the int first, and two ints fall back to exact comparison.
    pub fn sort_cmp(&self, other: &FieldValue) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        use FieldValue::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => (*a as f64).total_cmp(&(*b as f64)).then(a.cmp(b)),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Int(a), Float(b)) => (*a as f64).total_cmp(b).then(Ordering::Less),
            (Float(a), Int(b)) => a.total_cmp(&(*b as f64)).then(Ordering::Greater),
            (Text(a), Text(b)) => a.cmp(b),
            (Time(a), Time(b)) => a.cmp(b),
            (List(a), List(b)) => {
                for (x, y) in a.iter().zip(b) {
                    let ordering = x.sort_cmp(y);
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            FieldValue::Null => 0,
            FieldValue::Bool(_) => 1,
            FieldValue::Int(_) | FieldValue::Float(_) => 2,
            FieldValue::Text(_) => 3,
            FieldValue::Time(_) => 4,
            FieldValue::List(_) => 5,
        }
    }

    /// Loose equality that treats `Int(1)` and `Float(1.0)` as equal.
    pub fn loosely_equals(&self, other: &FieldValue) -> bool {
        match (self, other) {
            (FieldValue::Null, FieldValue::Null) => true,
            (FieldValue::List(a), FieldValue::List(b)) => a == b,
            _ => self.compare(other) == Some(std::cmp::Ordering::Equal),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Time(value)
    }
}

fn text_list(items: &[String]) -> FieldValue {
    FieldValue::List(items.iter().cloned().map(FieldValue::Text).collect())
}

// =============================================================================
// CLUSTER D: THE SEALED ENTITY UNION
// =============================================================================

/// Discriminant of the closed entity set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Node,
    Edge,
    Category,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Node => write!(f, "node"),
            EntityKind::Edge => write!(f, "edge"),
            EntityKind::Category => write!(f, "category"),
        }
    }
}

/// Borrowed view of any persisted entity.
///
/// Predicates match on this exhaustively, so adding an entity kind is a
/// compile error everywhere it has not been handled.
#[derive(Debug, Clone, Copy)]
pub enum EntityRef<'a> {
    Node(&'a Node),
    Edge(&'a Edge),
    Category(&'a Category),
}

impl<'a> EntityRef<'a> {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Node(_) => EntityKind::Node,
            EntityRef::Edge(_) => EntityKind::Edge,
            EntityRef::Category(_) => EntityKind::Category,
        }
    }

    pub fn user_id(&self) -> &'a UserId {
        match self {
            EntityRef::Node(n) => &n.user_id,
            EntityRef::Edge(e) => &e.user_id,
            EntityRef::Category(c) => &c.user_id,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            EntityRef::Node(n) => n.created_at,
            EntityRef::Edge(e) => e.created_at,
            EntityRef::Category(c) => c.created_at,
        }
    }

    pub fn id(&self) -> &'a str {
        match self {
            EntityRef::Node(n) => n.id.as_str(),
            EntityRef::Edge(e) => e.id.as_str(),
            EntityRef::Category(c) => c.id.as_str(),
        }
    }

    /// Look up a field by its storage name.
    ///
    /// Returns `None` when the entity kind has no such field, and
    /// `Some(FieldValue::Null)` when the field exists but is unset.
    pub fn field_value(&self, field: &str) -> Option<FieldValue> {
        match (self, field) {
            (_, "id") => Some(FieldValue::Text(self.id().to_string())),
            (_, "user_id") => Some(FieldValue::Text(self.user_id().to_string())),
            (_, "created_at") => Some(FieldValue::Time(self.created_at())),

            (EntityRef::Node(n), "content") => Some(FieldValue::Text(n.content.clone())),
            (EntityRef::Node(n), "keywords") => Some(text_list(&n.keywords)),
            (EntityRef::Node(n), "tags") => Some(text_list(&n.tags)),
            (EntityRef::Node(n), "archived") => Some(FieldValue::Bool(n.archived)),
            (EntityRef::Node(n), "version") => Some(FieldValue::Int(n.version as i64)),
            (EntityRef::Node(n), "updated_at") => Some(FieldValue::Time(n.updated_at)),
            (EntityRef::Node(n), other) => other
                .strip_prefix("metadata.")
                .map(|key| {
                    n.metadata
                        .get(key)
                        .map(|v| FieldValue::Text(v.clone()))
                        .unwrap_or(FieldValue::Null)
                }),

            (EntityRef::Edge(e), "source_id") => Some(FieldValue::Text(e.source_id.to_string())),
            (EntityRef::Edge(e), "target_id") => Some(FieldValue::Text(e.target_id.to_string())),
            (EntityRef::Edge(e), "strength") => Some(FieldValue::Float(e.strength)),
            (EntityRef::Edge(_), _) => None,

            (EntityRef::Category(c), "title") => Some(FieldValue::Text(c.title.clone())),
            (EntityRef::Category(c), "description") => {
                Some(FieldValue::Text(c.description.clone()))
            }
            (EntityRef::Category(c), "level") => Some(FieldValue::Int(i64::from(c.level))),
            (EntityRef::Category(c), "parent_id") => Some(
                c.parent_id
                    .as_ref()
                    .map(|p| FieldValue::Text(p.to_string()))
                    .unwrap_or(FieldValue::Null),
            ),
            (EntityRef::Category(_), _) => None,
        }
    }
}

/// Conversion into the sealed entity view.
pub trait AsEntityRef {
    fn as_entity_ref(&self) -> EntityRef<'_>;
}

impl AsEntityRef for Node {
    fn as_entity_ref(&self) -> EntityRef<'_> {
        EntityRef::Node(self)
    }
}

impl AsEntityRef for Edge {
    fn as_entity_ref(&self) -> EntityRef<'_> {
        EntityRef::Edge(self)
    }
}

impl AsEntityRef for Category {
    fn as_entity_ref(&self) -> EntityRef<'_> {
        EntityRef::Category(self)
    }
}

impl<'a> AsEntityRef for EntityRef<'a> {
    fn as_entity_ref(&self) -> EntityRef<'_> {
        *self
    }
}
