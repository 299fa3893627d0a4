//! Node, edge and category repositories over [`StoreInner`].
//!
//! A repository is bound to a [`Scope`] when it is minted: either committed
//! state or one open transaction.

use async_trait::async_trait;
use chrono::Utc;
use kg_01_query::{Filter, Page, Query, QueryOptions, Specification};
use shared_types::{
    Category, CategoryId, Context, Edge, EdgeId, EntityKind, Node, NodeId, RepositoryError,
    RepositoryResult, UserId,
};
use std::sync::Arc;
use tracing::debug;

use super::query::{execute_query, sort_keys, PageRequest};
use super::store::{Scope, StoreInner, StoredItem, WriteCondition, WriteOperation};
use crate::ports::{CategoryRepository, EdgeRepository, NodeRepository};

fn require_user(user_id: &UserId) -> RepositoryResult<()> {
    if user_id.is_empty() {
        return Err(RepositoryError::validation("user_id", "must not be empty"));
    }
    Ok(())
}

fn require_id(field: &str, id: &str) -> RepositoryResult<()> {
    if id.is_empty() {
        return Err(RepositoryError::validation(field, "must not be empty"));
    }
    Ok(())
}

fn query_filter(specification: &Specification, options: &QueryOptions) -> Filter {
    Filter::and(vec![specification.to_filter(), options.combined_filter()])
}

// =============================================================================
// NODES
// =============================================================================

pub struct MemoryNodeRepository {
    inner: Arc<StoreInner>,
    scope: Scope,
}

impl MemoryNodeRepository {
    pub(crate) fn new(inner: Arc<StoreInner>, scope: Scope) -> Self {
        Self { inner, scope }
    }

    fn load(&self, user_id: &UserId, id: &NodeId) -> RepositoryResult<Node> {
        require_user(user_id)?;
        require_id("node_id", id.as_str())?;
        self.inner
            .with_view(&self.scope, user_id, |p| p.nodes.get(id.as_str()).cloned())?
            .ok_or_else(|| RepositoryError::not_found("node", id))
    }

    fn page(
        &self,
        user_id: &UserId,
        filter: &Filter,
        options: &QueryOptions,
    ) -> RepositoryResult<Page<Node>> {
        require_user(user_id)?;
        let request = PageRequest::from_options(options)?;
        let sort = sort_keys(options);
        let include_archived = options.include_archived;
        self.inner.with_view(&self.scope, user_id, |p| {
            execute_query(
                user_id,
                p.nodes.values().filter(|n| include_archived || !n.archived),
                filter,
                &sort,
                &request,
            )
        })?
    }

    /// Write `next` over the stored node at `expected` version.
    fn replace(&self, mut next: Node, expected: u64) -> RepositoryResult<Node> {
        next.version = expected
            .checked_add(1)
            .ok_or_else(|| RepositoryError::validation("version", "version overflow"))?;
        next.updated_at = Utc::now();
        self.inner.write(
            &self.scope,
            vec![WriteOperation::put(
                StoredItem::Node(next.clone()),
                WriteCondition::VersionEquals(expected),
            )],
        )?;
        Ok(next)
    }

    fn set_archived(&self, user_id: &UserId, id: &NodeId, archived: bool) -> RepositoryResult<Node> {
        let current = self.load(user_id, id)?;
        if current.archived == archived {
            return Ok(current);
        }
        let expected = current.version;
        let mut next = current;
        next.archived = archived;
        self.replace(next, expected)
    }
}

#[async_trait]
impl NodeRepository for MemoryNodeRepository {
    async fn find_by_id(&self, ctx: &Context, user_id: &UserId, id: &NodeId) -> RepositoryResult<Node> {
        ctx.check()?;
        self.load(user_id, id)
    }

    async fn find_by_user(
        &self,
        ctx: &Context,
        user_id: &UserId,
        options: &QueryOptions,
    ) -> RepositoryResult<Page<Node>> {
        ctx.check()?;
        self.page(user_id, &options.combined_filter(), options)
    }

    async fn find_by_specification(
        &self,
        ctx: &Context,
        user_id: &UserId,
        specification: &Specification,
        options: &QueryOptions,
    ) -> RepositoryResult<Page<Node>> {
        ctx.check()?;
        self.page(user_id, &query_filter(specification, options), options)
    }

    async fn find_page(&self, ctx: &Context, query: &Query) -> RepositoryResult<Page<Node>> {
        ctx.check()?;
        let user_id = &query.user_id;
        require_user(user_id)?;
        let request = PageRequest::from_query(query)?;
        let filter = query.filter();
        let sort = query.effective_sort();
        let include_archived = query.include_archived;
        self.inner.with_view(&self.scope, user_id, |p| {
            execute_query(
                user_id,
                p.nodes.values().filter(|n| include_archived || !n.archived),
                &filter,
                &sort,
                &request,
            )
        })?
    }

    async fn save(&self, ctx: &Context, node: &Node) -> RepositoryResult<Node> {
        ctx.check()?;
        let saved = self.save_batch(ctx, std::slice::from_ref(node)).await?;
        saved
            .into_iter()
            .next()
            .ok_or_else(|| RepositoryError::storage("save returned no node"))
    }

    async fn update(&self, ctx: &Context, node: &Node) -> RepositoryResult<Node> {
        ctx.check()?;
        require_user(&node.user_id)?;
        require_id("node_id", node.id.as_str())?;
        if node.version == 0 {
            return Err(RepositoryError::validation(
                "version",
                "node has never been saved",
            ));
        }
        let updated = self.replace(node.clone(), node.version)?;
        debug!(node_id = %updated.id, version = updated.version, "node updated");
        Ok(updated)
    }

    async fn delete(&self, ctx: &Context, user_id: &UserId, id: &NodeId) -> RepositoryResult<()> {
        self.delete_batch(ctx, user_id, std::slice::from_ref(id)).await
    }

    async fn save_batch(&self, ctx: &Context, nodes: &[Node]) -> RepositoryResult<Vec<Node>> {
        ctx.check()?;
        let mut saved = Vec::with_capacity(nodes.len());
        for node in nodes {
            require_user(&node.user_id)?;
            require_id("node_id", node.id.as_str())?;
            let mut stored = node.clone();
            stored.version = 1;
            saved.push(stored);
        }
        let ops = saved
            .iter()
            .map(|n| WriteOperation::put(StoredItem::Node(n.clone()), WriteCondition::NotExists))
            .collect();
        self.inner.write(&self.scope, ops)?;
        debug!(count = saved.len(), "nodes saved");
        Ok(saved)
    }

    async fn delete_batch(&self, ctx: &Context, user_id: &UserId, ids: &[NodeId]) -> RepositoryResult<()> {
        ctx.check()?;
        require_user(user_id)?;
        for id in ids {
            require_id("node_id", id.as_str())?;
        }
        let ops = ids
            .iter()
            .map(|id| WriteOperation::delete(EntityKind::Node, user_id, id.as_str()))
            .collect();
        self.inner.write(&self.scope, ops)
    }

    async fn archive(&self, ctx: &Context, user_id: &UserId, id: &NodeId) -> RepositoryResult<Node> {
        ctx.check()?;
        self.set_archived(user_id, id, true)
    }

    async fn unarchive(&self, ctx: &Context, user_id: &UserId, id: &NodeId) -> RepositoryResult<Node> {
        ctx.check()?;
        self.set_archived(user_id, id, false)
    }

    async fn update_version(
        &self,
        ctx: &Context,
        user_id: &UserId,
        id: &NodeId,
        expected_version: u64,
    ) -> RepositoryResult<u64> {
        ctx.check()?;
        let current = self.load(user_id, id)?;
        let next = self.replace(current, expected_version)?;
        Ok(next.version)
    }
}

// =============================================================================
// EDGES
// =============================================================================

pub struct MemoryEdgeRepository {
    inner: Arc<StoreInner>,
    scope: Scope,
}

impl MemoryEdgeRepository {
    pub(crate) fn new(inner: Arc<StoreInner>, scope: Scope) -> Self {
        Self { inner, scope }
    }

    fn page(
        &self,
        user_id: &UserId,
        filter: &Filter,
        options: &QueryOptions,
    ) -> RepositoryResult<Page<Edge>> {
        require_user(user_id)?;
        let request = PageRequest::from_options(options)?;
        let sort = sort_keys(options);
        self.inner.with_view(&self.scope, user_id, |p| {
            execute_query(user_id, p.edges.values(), filter, &sort, &request)
        })?
    }

    fn touching(&self, user_id: &UserId, node_id: &NodeId) -> RepositoryResult<Vec<Edge>> {
        require_user(user_id)?;
        require_id("node_id", node_id.as_str())?;
        self.inner.with_view(&self.scope, user_id, |p| {
            p.edges
                .values()
                .filter(|e| e.connects(node_id))
                .cloned()
                .collect()
        })
    }
}

fn validate_edge(edge: &Edge) -> RepositoryResult<()> {
    require_user(&edge.user_id)?;
    require_id("edge_id", edge.id.as_str())?;
    require_id("source_id", edge.source_id.as_str())?;
    require_id("target_id", edge.target_id.as_str())?;
    if !(0.0..=1.0).contains(&edge.strength) {
        return Err(RepositoryError::validation(
            "strength",
            format!("{} is outside [0, 1]", edge.strength),
        ));
    }
    Ok(())
}

#[async_trait]
impl EdgeRepository for MemoryEdgeRepository {
    async fn find_by_id(&self, ctx: &Context, user_id: &UserId, id: &EdgeId) -> RepositoryResult<Edge> {
        ctx.check()?;
        require_user(user_id)?;
        require_id("edge_id", id.as_str())?;
        self.inner
            .with_view(&self.scope, user_id, |p| p.edges.get(id.as_str()).cloned())?
            .ok_or_else(|| RepositoryError::not_found("edge", id))
    }

    async fn find_by_user(
        &self,
        ctx: &Context,
        user_id: &UserId,
        options: &QueryOptions,
    ) -> RepositoryResult<Page<Edge>> {
        ctx.check()?;
        self.page(user_id, &options.combined_filter(), options)
    }

    async fn find_by_specification(
        &self,
        ctx: &Context,
        user_id: &UserId,
        specification: &Specification,
        options: &QueryOptions,
    ) -> RepositoryResult<Page<Edge>> {
        ctx.check()?;
        self.page(user_id, &query_filter(specification, options), options)
    }

    async fn find_by_node(
        &self,
        ctx: &Context,
        user_id: &UserId,
        node_id: &NodeId,
    ) -> RepositoryResult<Vec<Edge>> {
        ctx.check()?;
        self.touching(user_id, node_id)
    }

    async fn save(&self, ctx: &Context, edge: &Edge) -> RepositoryResult<Edge> {
        ctx.check()?;
        validate_edge(edge)?;
        self.inner.write(
            &self.scope,
            vec![WriteOperation::put(
                StoredItem::Edge(edge.clone()),
                WriteCondition::NotExists,
            )],
        )?;
        Ok(edge.clone())
    }

    async fn save_batch(&self, ctx: &Context, edges: &[Edge]) -> RepositoryResult<Vec<Edge>> {
        ctx.check()?;
        for edge in edges {
            validate_edge(edge)?;
        }
        let ops = edges
            .iter()
            .map(|e| WriteOperation::put(StoredItem::Edge(e.clone()), WriteCondition::NotExists))
            .collect();
        self.inner.write(&self.scope, ops)?;
        Ok(edges.to_vec())
    }

    async fn delete(&self, ctx: &Context, user_id: &UserId, id: &EdgeId) -> RepositoryResult<()> {
        ctx.check()?;
        require_user(user_id)?;
        require_id("edge_id", id.as_str())?;
        self.inner.write(
            &self.scope,
            vec![WriteOperation::delete(EntityKind::Edge, user_id, id.as_str())],
        )
    }

    async fn delete_by_node(
        &self,
        ctx: &Context,
        user_id: &UserId,
        node_id: &NodeId,
    ) -> RepositoryResult<usize> {
        ctx.check()?;
        let edges = self.touching(user_id, node_id)?;
        if edges.is_empty() {
            return Ok(0);
        }
        let ops = edges
            .iter()
            .map(|e| WriteOperation::delete(EntityKind::Edge, user_id, e.id.as_str()))
            .collect();
        self.inner.write(&self.scope, ops)?;
        debug!(node_id = %node_id, removed = edges.len(), "edges deleted by node");
        Ok(edges.len())
    }
}

// =============================================================================
// CATEGORIES
// =============================================================================

pub struct MemoryCategoryRepository {
    inner: Arc<StoreInner>,
    scope: Scope,
}

impl MemoryCategoryRepository {
    pub(crate) fn new(inner: Arc<StoreInner>, scope: Scope) -> Self {
        Self { inner, scope }
    }

    fn page(
        &self,
        user_id: &UserId,
        filter: &Filter,
        options: &QueryOptions,
    ) -> RepositoryResult<Page<Category>> {
        require_user(user_id)?;
        let request = PageRequest::from_options(options)?;
        let sort = sort_keys(options);
        self.inner.with_view(&self.scope, user_id, |p| {
            execute_query(user_id, p.categories.values(), filter, &sort, &request)
        })?
    }
}

fn validate_category(category: &Category) -> RepositoryResult<()> {
    require_user(&category.user_id)?;
    require_id("category_id", category.id.as_str())?;
    if category.title.trim().is_empty() {
        return Err(RepositoryError::validation("title", "must not be empty"));
    }
    if category.parent_id.as_ref() == Some(&category.id) {
        return Err(RepositoryError::validation(
            "parent_id",
            "a category cannot be its own parent",
        ));
    }
    Ok(())
}

#[async_trait]
impl CategoryRepository for MemoryCategoryRepository {
    async fn find_by_id(
        &self,
        ctx: &Context,
        user_id: &UserId,
        id: &CategoryId,
    ) -> RepositoryResult<Category> {
        ctx.check()?;
        require_user(user_id)?;
        require_id("category_id", id.as_str())?;
        self.inner
            .with_view(&self.scope, user_id, |p| p.categories.get(id.as_str()).cloned())?
            .ok_or_else(|| RepositoryError::not_found("category", id))
    }

    async fn find_by_user(
        &self,
        ctx: &Context,
        user_id: &UserId,
        options: &QueryOptions,
    ) -> RepositoryResult<Page<Category>> {
        ctx.check()?;
        self.page(user_id, &options.combined_filter(), options)
    }

    async fn find_by_specification(
        &self,
        ctx: &Context,
        user_id: &UserId,
        specification: &Specification,
        options: &QueryOptions,
    ) -> RepositoryResult<Page<Category>> {
        ctx.check()?;
        self.page(user_id, &query_filter(specification, options), options)
    }

    async fn find_children(
        &self,
        ctx: &Context,
        user_id: &UserId,
        parent_id: &CategoryId,
    ) -> RepositoryResult<Vec<Category>> {
        ctx.check()?;
        require_user(user_id)?;
        self.inner.with_view(&self.scope, user_id, |p| {
            p.categories
                .values()
                .filter(|c| c.parent_id.as_ref() == Some(parent_id))
                .cloned()
                .collect()
        })
    }

    async fn save(&self, ctx: &Context, category: &Category) -> RepositoryResult<Category> {
        ctx.check()?;
        validate_category(category)?;
        self.inner.write(
            &self.scope,
            vec![WriteOperation::put(
                StoredItem::Category(category.clone()),
                WriteCondition::NotExists,
            )],
        )?;
        Ok(category.clone())
    }

    async fn update(&self, ctx: &Context, category: &Category) -> RepositoryResult<Category> {
        ctx.check()?;
        validate_category(category)?;
        self.inner.write(
            &self.scope,
            vec![WriteOperation::put(
                StoredItem::Category(category.clone()),
                WriteCondition::Exists,
            )],
        )?;
        Ok(category.clone())
    }

    async fn delete(&self, ctx: &Context, user_id: &UserId, id: &CategoryId) -> RepositoryResult<()> {
        ctx.check()?;
        require_user(user_id)?;
        require_id("category_id", id.as_str())?;
        self.inner.write(
            &self.scope,
            vec![WriteOperation::delete(EntityKind::Category, user_id, id.as_str())],
        )
    }
}
