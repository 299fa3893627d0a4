//! Versioned aggregates and conflict resolution policies.

use chrono::Utc;
use shared_types::Node;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// An aggregate whose writes are version-controlled as a unit.
pub trait Versioned {
    fn aggregate_id(&self) -> &str;

    /// Version the caller last observed; 0 for a never-saved aggregate.
    fn version(&self) -> u64;

    fn set_version(&mut self, version: u64);
}

impl Versioned for Node {
    fn aggregate_id(&self) -> &str {
        self.id.as_str()
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

/// Strategy for combining a stored node with a conflicting incoming write.
///
/// The result always carries `current.version + 1`.
pub trait ConflictResolver: Send + Sync {
    fn name(&self) -> &'static str;

    fn resolve(&self, current: &Node, incoming: &Node) -> Node;
}

/// Take the incoming node as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWins;

impl ConflictResolver for LastWriteWins {
    fn name(&self) -> &'static str {
        "last_write_wins"
    }

    fn resolve(&self, current: &Node, incoming: &Node) -> Node {
        let mut resolved = incoming.clone();
        resolved.version = current.version + 1;
        resolved.created_at = current.created_at;
        resolved.updated_at = Utc::now();
        resolved
    }
}

/// Incoming content, union of keywords, tags and metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeResolver;

impl ConflictResolver for MergeResolver {
    fn name(&self) -> &'static str {
        "merge"
    }

    fn resolve(&self, current: &Node, incoming: &Node) -> Node {
        let mut resolved = incoming.clone();
        resolved.keywords = union(&current.keywords, &incoming.keywords);
        resolved.tags = union(&current.tags, &incoming.tags);

        let mut metadata = current.metadata.clone();
        metadata.extend(incoming.metadata.clone());
        resolved.metadata = metadata;

        resolved.version = current.version + 1;
        resolved.created_at = current.created_at;
        resolved.updated_at = Utc::now();
        resolved
    }
}

/// Order-preserving union, `a` first.
fn union(a: &[String], b: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(a.len() + b.len());
    for item in a.iter().chain(b) {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

/// Kind of update a writer performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    Content,
    Keywords,
    Tags,
    Metadata,
    Archive,
    /// Whole-aggregate replacement.
    Replace,
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdateKind::Content => "content",
            UpdateKind::Keywords => "keywords",
            UpdateKind::Tags => "tags",
            UpdateKind::Metadata => "metadata",
            UpdateKind::Archive => "archive",
            UpdateKind::Replace => "replace",
        };
        f.write_str(name)
    }
}

/// Explicit assignment of a resolver to each update kind.
///
/// Default: content, archive and replace writes use last-write-wins;
/// keyword, tag and metadata edits merge.
#[derive(Clone)]
pub struct ConflictPolicy {
    resolvers: HashMap<UpdateKind, Arc<dyn ConflictResolver>>,
    fallback: Arc<dyn ConflictResolver>,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        let lww: Arc<dyn ConflictResolver> = Arc::new(LastWriteWins);
        let merge: Arc<dyn ConflictResolver> = Arc::new(MergeResolver);

        let mut resolvers = HashMap::new();
        resolvers.insert(UpdateKind::Content, lww.clone());
        resolvers.insert(UpdateKind::Archive, lww.clone());
        resolvers.insert(UpdateKind::Replace, lww.clone());
        resolvers.insert(UpdateKind::Keywords, merge.clone());
        resolvers.insert(UpdateKind::Tags, merge.clone());
        resolvers.insert(UpdateKind::Metadata, merge);

        Self {
            resolvers,
            fallback: lww,
        }
    }
}

impl fmt::Debug for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (kind, resolver) in &self.resolvers {
            map.entry(&kind.to_string(), &resolver.name());
        }
        map.finish()
    }
}

impl ConflictPolicy {
    pub fn with_resolver(mut self, kind: UpdateKind, resolver: Arc<dyn ConflictResolver>) -> Self {
        self.resolvers.insert(kind, resolver);
        self
    }

    pub fn resolver_for(&self, kind: UpdateKind) -> &dyn ConflictResolver {
        self.resolvers
            .get(&kind)
            .map(|r| r.as_ref())
            .unwrap_or(self.fallback.as_ref())
    }

    pub fn resolve(&self, kind: UpdateKind, current: &Node, incoming: &Node) -> Node {
        self.resolver_for(kind).resolve(current, incoming)
    }
}
