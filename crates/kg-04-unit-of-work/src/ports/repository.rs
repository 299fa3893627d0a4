//! # Repository Ports (Driving side)
//!
//! Read and write contracts per aggregate kind, consumed by command and
//! query handlers. Every call names the owning user explicitly.
//!
//! ## Versions
//!
//! A node is stored at version 1 by `save`. `update`, `archive`,
//! `unarchive` and `update_version` succeed only when the caller's expected
//! version matches the stored one, and advance it by exactly 1.

use async_trait::async_trait;
use kg_01_query::{Page, Query, QueryOptions, Specification};
use shared_types::{
    Category, CategoryId, Context, Edge, EdgeId, Node, NodeId, RepositoryResult, UserId,
};
use std::sync::Arc;

#[async_trait]
pub trait NodeRepository: Send + Sync {
    async fn find_by_id(&self, ctx: &Context, user_id: &UserId, id: &NodeId) -> RepositoryResult<Node>;

    async fn find_by_user(
        &self,
        ctx: &Context,
        user_id: &UserId,
        options: &QueryOptions,
    ) -> RepositoryResult<Page<Node>>;

    async fn find_by_specification(
        &self,
        ctx: &Context,
        user_id: &UserId,
        specification: &Specification,
        options: &QueryOptions,
    ) -> RepositoryResult<Page<Node>>;

    /// Execute a query produced by `QueryBuilder::build_query`.
    async fn find_page(&self, ctx: &Context, query: &Query) -> RepositoryResult<Page<Node>>;

    /// Create a node. Fails with a conflict if the id is taken.
    async fn save(&self, ctx: &Context, node: &Node) -> RepositoryResult<Node>;

    /// Replace a node whose stored version equals `node.version`.
    async fn update(&self, ctx: &Context, node: &Node) -> RepositoryResult<Node>;

    async fn delete(&self, ctx: &Context, user_id: &UserId, id: &NodeId) -> RepositoryResult<()>;

    /// Create several nodes, all or none.
    async fn save_batch(&self, ctx: &Context, nodes: &[Node]) -> RepositoryResult<Vec<Node>>;

    /// Delete several nodes, all or none.
    async fn delete_batch(&self, ctx: &Context, user_id: &UserId, ids: &[NodeId]) -> RepositoryResult<()>;

    async fn archive(&self, ctx: &Context, user_id: &UserId, id: &NodeId) -> RepositoryResult<Node>;

    async fn unarchive(&self, ctx: &Context, user_id: &UserId, id: &NodeId) -> RepositoryResult<Node>;

    /// Advance the version of an unchanged node; returns the new version.
    async fn update_version(
        &self,
        ctx: &Context,
        user_id: &UserId,
        id: &NodeId,
        expected_version: u64,
    ) -> RepositoryResult<u64>;
}

#[async_trait]
pub trait EdgeRepository: Send + Sync {
    async fn find_by_id(&self, ctx: &Context, user_id: &UserId, id: &EdgeId) -> RepositoryResult<Edge>;

    async fn find_by_user(
        &self,
        ctx: &Context,
        user_id: &UserId,
        options: &QueryOptions,
    ) -> RepositoryResult<Page<Edge>>;

    async fn find_by_specification(
        &self,
        ctx: &Context,
        user_id: &UserId,
        specification: &Specification,
        options: &QueryOptions,
    ) -> RepositoryResult<Page<Edge>>;

    /// Every edge touching `node_id` at either end.
    async fn find_by_node(
        &self,
        ctx: &Context,
        user_id: &UserId,
        node_id: &NodeId,
    ) -> RepositoryResult<Vec<Edge>>;

    async fn save(&self, ctx: &Context, edge: &Edge) -> RepositoryResult<Edge>;

    async fn save_batch(&self, ctx: &Context, edges: &[Edge]) -> RepositoryResult<Vec<Edge>>;

    async fn delete(&self, ctx: &Context, user_id: &UserId, id: &EdgeId) -> RepositoryResult<()>;

    /// Delete every edge touching `node_id`; returns how many.
    async fn delete_by_node(
        &self,
        ctx: &Context,
        user_id: &UserId,
        node_id: &NodeId,
    ) -> RepositoryResult<usize>;
}

#[async_trait]
pub trait CategoryRepository: Send + Sync {
    async fn find_by_id(
        &self,
        ctx: &Context,
        user_id: &UserId,
        id: &CategoryId,
    ) -> RepositoryResult<Category>;

    async fn find_by_user(
        &self,
        ctx: &Context,
        user_id: &UserId,
        options: &QueryOptions,
    ) -> RepositoryResult<Page<Category>>;

    async fn find_by_specification(
        &self,
        ctx: &Context,
        user_id: &UserId,
        specification: &Specification,
        options: &QueryOptions,
    ) -> RepositoryResult<Page<Category>>;

    async fn find_children(
        &self,
        ctx: &Context,
        user_id: &UserId,
        parent_id: &CategoryId,
    ) -> RepositoryResult<Vec<Category>>;

    async fn save(&self, ctx: &Context, category: &Category) -> RepositoryResult<Category>;

    /// Replace an existing category.
    async fn update(&self, ctx: &Context, category: &Category) -> RepositoryResult<Category>;

    async fn delete(&self, ctx: &Context, user_id: &UserId, id: &CategoryId) -> RepositoryResult<()>;
}

/// One repository per aggregate kind, all bound to the same scope.
#[derive(Clone)]
pub struct RepositorySet {
    pub nodes: Arc<dyn NodeRepository>,
    pub edges: Arc<dyn EdgeRepository>,
    pub categories: Arc<dyn CategoryRepository>,
}

impl std::fmt::Debug for RepositorySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositorySet").finish_non_exhaustive()
    }
}
