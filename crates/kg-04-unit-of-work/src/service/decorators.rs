//! # Repository Decorators
//!
//! Cross-cutting wrappers over a [`NodeRepository`], applied as an explicit
//! ordered list. The first layer added is the outermost:
//!
//! ```text
//! DecoratorChain::standard  =  logging → metrics → caching → resilience → store
//! ```
//!
//! Logging, metrics and resilience wrap every call through a single
//! `around` hook. Caching serves `find_by_id` from an LRU and keeps it
//! coherent with writes made through the same decorator, so it belongs
//! over committed-state repositories rather than transaction-bound ones.

use async_trait::async_trait;
use kg_01_query::{Page, Query, QueryOptions, Specification};
use kg_03_resilience::{
    retry_with_backoff, CircuitBreaker, RateLimiter, ResourceManager, RetryConfig,
};
use kg_telemetry::{Outcome, RepositoryMetrics};
use lru::LruCache;
use parking_lot::Mutex;
use shared_types::{Context, Node, NodeId, RepositoryResult, UserId};
use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::config::CoreConfig;
use crate::ports::NodeRepository;

/// One wrapper in a [`DecoratorChain`].
pub trait RepositoryLayer: Send + Sync {
    fn name(&self) -> &'static str;

    fn wrap(&self, inner: Arc<dyn NodeRepository>) -> Arc<dyn NodeRepository>;
}

/// Ordered list of layers; the first added ends up outermost.
#[derive(Default)]
pub struct DecoratorChain {
    layers: Vec<Box<dyn RepositoryLayer>>,
}

impl fmt::Debug for DecoratorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl DecoratorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, layer: impl RepositoryLayer + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    /// Logging, metrics, caching (unless disabled) and resilience.
    pub fn standard(config: &CoreConfig, metrics: RepositoryMetrics) -> Self {
        let mut chain = Self::new()
            .with(LoggingLayer)
            .with(MetricsLayer::new(metrics.clone()));
        if let Some(capacity) = NonZeroUsize::new(config.cache_capacity) {
            chain = chain.with(CachingLayer::new(capacity).with_metrics(metrics));
        }
        chain.with(ResilienceLayer::from_config(config))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|l| l.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn apply(&self, repository: Arc<dyn NodeRepository>) -> Arc<dyn NodeRepository> {
        self.layers
            .iter()
            .rev()
            .fold(repository, |inner, layer| layer.wrap(inner))
    }
}

/// Implements `NodeRepository` by routing every call through
/// `self.around(ctx, operation, || self.inner.<call>)`.
macro_rules! around_node_repository {
    ($decorator:ty) => {
        #[async_trait]
        impl NodeRepository for $decorator {
            async fn find_by_id(
                &self,
                ctx: &Context,
                user_id: &UserId,
                id: &NodeId,
            ) -> RepositoryResult<Node> {
                self.around(ctx, "find_by_id", || self.inner.find_by_id(ctx, user_id, id))
                    .await
            }

            async fn find_by_user(
                &self,
                ctx: &Context,
                user_id: &UserId,
                options: &QueryOptions,
            ) -> RepositoryResult<Page<Node>> {
                self.around(ctx, "find_by_user", || {
                    self.inner.find_by_user(ctx, user_id, options)
                })
                .await
            }

            async fn find_by_specification(
                &self,
                ctx: &Context,
                user_id: &UserId,
                specification: &Specification,
                options: &QueryOptions,
            ) -> RepositoryResult<Page<Node>> {
                self.around(ctx, "find_by_specification", || {
                    self.inner
                        .find_by_specification(ctx, user_id, specification, options)
                })
                .await
            }

            async fn find_page(&self, ctx: &Context, query: &Query) -> RepositoryResult<Page<Node>> {
                self.around(ctx, "find_page", || self.inner.find_page(ctx, query))
                    .await
            }

            async fn save(&self, ctx: &Context, node: &Node) -> RepositoryResult<Node> {
                self.around(ctx, "save", || self.inner.save(ctx, node)).await
            }

            async fn update(&self, ctx: &Context, node: &Node) -> RepositoryResult<Node> {
                self.around(ctx, "update", || self.inner.update(ctx, node)).await
            }

            async fn delete(
                &self,
                ctx: &Context,
                user_id: &UserId,
                id: &NodeId,
            ) -> RepositoryResult<()> {
                self.around(ctx, "delete", || self.inner.delete(ctx, user_id, id))
                    .await
            }

            async fn save_batch(&self, ctx: &Context, nodes: &[Node]) -> RepositoryResult<Vec<Node>> {
                self.around(ctx, "save_batch", || self.inner.save_batch(ctx, nodes))
                    .await
            }

            async fn delete_batch(
                &self,
                ctx: &Context,
                user_id: &UserId,
                ids: &[NodeId],
            ) -> RepositoryResult<()> {
                self.around(ctx, "delete_batch", || {
                    self.inner.delete_batch(ctx, user_id, ids)
                })
                .await
            }

            async fn archive(
                &self,
                ctx: &Context,
                user_id: &UserId,
                id: &NodeId,
            ) -> RepositoryResult<Node> {
                self.around(ctx, "archive", || self.inner.archive(ctx, user_id, id))
                    .await
            }

            async fn unarchive(
                &self,
                ctx: &Context,
                user_id: &UserId,
                id: &NodeId,
            ) -> RepositoryResult<Node> {
                self.around(ctx, "unarchive", || self.inner.unarchive(ctx, user_id, id))
                    .await
            }

            async fn update_version(
                &self,
                ctx: &Context,
                user_id: &UserId,
                id: &NodeId,
                expected_version: u64,
            ) -> RepositoryResult<u64> {
                self.around(ctx, "update_version", || {
                    self.inner
                        .update_version(ctx, user_id, id, expected_version)
                })
                .await
            }
        }
    };
}

// =============================================================================
// LOGGING
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingLayer;

impl RepositoryLayer for LoggingLayer {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn wrap(&self, inner: Arc<dyn NodeRepository>) -> Arc<dyn NodeRepository> {
        Arc::new(LoggingNodeRepository { inner })
    }
}

pub struct LoggingNodeRepository {
    inner: Arc<dyn NodeRepository>,
}

impl LoggingNodeRepository {
    async fn around<T, F, Fut>(&self, _ctx: &Context, operation: &'static str, call: F) -> RepositoryResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = RepositoryResult<T>>,
    {
        let started = Instant::now();
        let result = call().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => debug!(operation, elapsed_ms, "Repository call succeeded"),
            Err(err) if err.is_not_found() => debug!(operation, elapsed_ms, "Repository lookup missed"),
            Err(err) => warn!(operation, elapsed_ms, error = %err, "Repository call failed"),
        }
        result
    }
}

around_node_repository!(LoggingNodeRepository);

// =============================================================================
// METRICS
// =============================================================================

#[derive(Clone)]
pub struct MetricsLayer {
    metrics: RepositoryMetrics,
}

impl MetricsLayer {
    pub fn new(metrics: RepositoryMetrics) -> Self {
        Self { metrics }
    }
}

impl RepositoryLayer for MetricsLayer {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn wrap(&self, inner: Arc<dyn NodeRepository>) -> Arc<dyn NodeRepository> {
        Arc::new(MetricsNodeRepository {
            inner,
            metrics: self.metrics.clone(),
        })
    }
}

pub struct MetricsNodeRepository {
    inner: Arc<dyn NodeRepository>,
    metrics: RepositoryMetrics,
}

fn outcome_of<T>(result: &RepositoryResult<T>) -> Outcome {
    match result {
        Ok(_) => Outcome::Success,
        Err(err) if err.is_not_found() => Outcome::NotFound,
        Err(err) if err.is_conflict() => Outcome::Conflict,
        Err(_) => Outcome::Error,
    }
}

impl MetricsNodeRepository {
    async fn around<T, F, Fut>(&self, _ctx: &Context, operation: &'static str, call: F) -> RepositoryResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = RepositoryResult<T>>,
    {
        let started = Instant::now();
        let result = call().await;
        self.metrics
            .observe(operation, outcome_of(&result), started.elapsed());
        result
    }
}

around_node_repository!(MetricsNodeRepository);

// =============================================================================
// RESILIENCE
// =============================================================================

/// Rate limit, then hold a connection permit, then retry through the breaker.
#[derive(Clone)]
pub struct ResilienceLayer {
    retry: RetryConfig,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    resources: Arc<ResourceManager>,
}

impl ResilienceLayer {
    pub fn new(
        retry: RetryConfig,
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<RateLimiter>,
        resources: Arc<ResourceManager>,
    ) -> Self {
        Self {
            retry,
            breaker,
            limiter,
            resources,
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(
            config.retry.clone(),
            Arc::new(CircuitBreaker::new("node-repository", config.circuit_breaker.clone())),
            Arc::new(RateLimiter::new("node-repository", config.rate_limiter.clone())),
            Arc::new(ResourceManager::new(config.resources.clone())),
        )
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }
}

impl RepositoryLayer for ResilienceLayer {
    fn name(&self) -> &'static str {
        "resilience"
    }

    fn wrap(&self, inner: Arc<dyn NodeRepository>) -> Arc<dyn NodeRepository> {
        Arc::new(ResilientNodeRepository {
            inner,
            layer: self.clone(),
        })
    }
}

pub struct ResilientNodeRepository {
    inner: Arc<dyn NodeRepository>,
    layer: ResilienceLayer,
}

impl ResilientNodeRepository {
    async fn around<T, F, Fut>(&self, ctx: &Context, operation: &'static str, call: F) -> RepositoryResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = RepositoryResult<T>>,
    {
        self.layer.limiter.allow(ctx).await?;
        let _permit = self.layer.resources.acquire_connection(ctx).await?;
        let breaker = &self.layer.breaker;
        retry_with_backoff(ctx, &self.layer.retry, || breaker.call(&call))
            .await
            .map_err(|err| {
                debug!(operation, error = %err, "Resilient call gave up");
                err
            })
    }
}

around_node_repository!(ResilientNodeRepository);

// =============================================================================
// CACHING
// =============================================================================

#[derive(Clone)]
pub struct CachingLayer {
    capacity: NonZeroUsize,
    metrics: Option<RepositoryMetrics>,
}

impl CachingLayer {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            metrics: None,
        }
    }

    /// Report the cache size through `metrics`.
    pub fn with_metrics(mut self, metrics: RepositoryMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl RepositoryLayer for CachingLayer {
    fn name(&self) -> &'static str {
        "caching"
    }

    fn wrap(&self, inner: Arc<dyn NodeRepository>) -> Arc<dyn NodeRepository> {
        Arc::new(CachingNodeRepository::new(
            inner,
            self.capacity,
            self.metrics.clone(),
        ))
    }
}

type CacheKey = (UserId, NodeId);

/// Read-through cache for `find_by_id`.
pub struct CachingNodeRepository {
    inner: Arc<dyn NodeRepository>,
    cache: Mutex<LruCache<CacheKey, Node>>,
    metrics: Option<RepositoryMetrics>,
}

impl CachingNodeRepository {
    pub fn new(
        inner: Arc<dyn NodeRepository>,
        capacity: NonZeroUsize,
        metrics: Option<RepositoryMetrics>,
    ) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
            metrics,
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().len()
    }

    fn remember(&self, node: &Node) {
        let entries = {
            let mut cache = self.cache.lock();
            cache.put((node.user_id.clone(), node.id.clone()), node.clone());
            cache.len()
        };
        self.report(entries);
    }

    fn forget(&self, user_id: &UserId, id: &NodeId) {
        let entries = {
            let mut cache = self.cache.lock();
            cache.pop(&(user_id.clone(), id.clone()));
            cache.len()
        };
        self.report(entries);
    }

    fn report(&self, entries: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.set_cache_entries(entries);
        }
    }
}

#[async_trait]
impl NodeRepository for CachingNodeRepository {
    async fn find_by_id(&self, ctx: &Context, user_id: &UserId, id: &NodeId) -> RepositoryResult<Node> {
        ctx.check()?;
        let hit = self.cache.lock().get(&(user_id.clone(), id.clone())).cloned();
        if let Some(node) = hit {
            debug!(node_id = %id, "Cache hit");
            return Ok(node);
        }
        let node = self.inner.find_by_id(ctx, user_id, id).await?;
        self.remember(&node);
        Ok(node)
    }

    async fn find_by_user(
        &self,
        ctx: &Context,
        user_id: &UserId,
        options: &QueryOptions,
    ) -> RepositoryResult<Page<Node>> {
        self.inner.find_by_user(ctx, user_id, options).await
    }

    async fn find_by_specification(
        &self,
        ctx: &Context,
        user_id: &UserId,
        specification: &Specification,
        options: &QueryOptions,
    ) -> RepositoryResult<Page<Node>> {
        self.inner
            .find_by_specification(ctx, user_id, specification, options)
            .await
    }

    async fn find_page(&self, ctx: &Context, query: &Query) -> RepositoryResult<Page<Node>> {
        self.inner.find_page(ctx, query).await
    }

    async fn save(&self, ctx: &Context, node: &Node) -> RepositoryResult<Node> {
        let saved = self.inner.save(ctx, node).await?;
        self.remember(&saved);
        Ok(saved)
    }

    async fn update(&self, ctx: &Context, node: &Node) -> RepositoryResult<Node> {
        match self.inner.update(ctx, node).await {
            Ok(updated) => {
                self.remember(&updated);
                Ok(updated)
            }
            Err(err) => {
                // A conflict means the cached copy may be stale too.
                self.forget(&node.user_id, &node.id);
                Err(err)
            }
        }
    }

    async fn delete(&self, ctx: &Context, user_id: &UserId, id: &NodeId) -> RepositoryResult<()> {
        self.inner.delete(ctx, user_id, id).await?;
        self.forget(user_id, id);
        Ok(())
    }

    async fn save_batch(&self, ctx: &Context, nodes: &[Node]) -> RepositoryResult<Vec<Node>> {
        let saved = self.inner.save_batch(ctx, nodes).await?;
        for node in &saved {
            self.remember(node);
        }
        Ok(saved)
    }

    async fn delete_batch(&self, ctx: &Context, user_id: &UserId, ids: &[NodeId]) -> RepositoryResult<()> {
        self.inner.delete_batch(ctx, user_id, ids).await?;
        for id in ids {
            self.forget(user_id, id);
        }
        Ok(())
    }

    async fn archive(&self, ctx: &Context, user_id: &UserId, id: &NodeId) -> RepositoryResult<Node> {
        let node = self.inner.archive(ctx, user_id, id).await?;
        self.remember(&node);
        Ok(node)
    }

    async fn unarchive(&self, ctx: &Context, user_id: &UserId, id: &NodeId) -> RepositoryResult<Node> {
        let node = self.inner.unarchive(ctx, user_id, id).await?;
        self.remember(&node);
        Ok(node)
    }

    async fn update_version(
        &self,
        ctx: &Context,
        user_id: &UserId,
        id: &NodeId,
        expected_version: u64,
    ) -> RepositoryResult<u64> {
        let result = self
            .inner
            .update_version(ctx, user_id, id, expected_version)
            .await;
        self.forget(user_id, id);
        result
    }
}
