//! # Resilience Flows
//!
//! Retry, circuit breaking, batching and the standard decorator chain
//! applied to real repository and unit-of-work calls:
//!
//! 1. **Decorator chain**: configured from the environment, observed by metrics
//! 2. **Retry**: a transient commit failure is retried to success
//! 3. **Circuit breaker**: a failing store stops receiving calls
//! 4. **Batch**: bounded-concurrency saves with per-item outcomes

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use kg_03_resilience::{
        retry_with_backoff, BatchConfig, BatchExecutor, CircuitBreaker, CircuitBreakerConfig,
        CircuitState, ItemOutcome, RetryConfig,
    };
    use kg_04_unit_of_work::{CoreConfig, DecoratorChain, InMemoryStore, UnitOfWork};
    use kg_telemetry::{encode_text, Outcome, RepositoryMetrics};
    use prometheus::Registry;
    use shared_bus::{EventPublisher, InMemoryEventBus};
    use shared_types::{
        Context, DomainEvent, DomainEventKind, Node, NodeId, RepositoryError, RepositoryResult,
        TransientKind, UserId,
    };

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    fn user() -> UserId {
        UserId::new("user-1")
    }

    /// Create `draft` and announce it, in a fresh unit of work.
    async fn create_in_unit(
        store: &InMemoryStore,
        bus: &Arc<InMemoryEventBus>,
        ctx: &Context,
        draft: &Node,
    ) -> RepositoryResult<Node> {
        let mut uow = UnitOfWork::over(store.clone(), bus.clone());
        uow.run(ctx, |scope| {
            let ctx = ctx.clone();
            let draft = draft.clone();
            async move {
                let node = scope.repositories.nodes.save(&ctx, &draft).await?;
                scope.publish(DomainEvent::new(
                    node.user_id.clone(),
                    DomainEventKind::NodeCreated {
                        node_id: node.id.clone(),
                    },
                ))?;
                Ok::<_, RepositoryError>(node)
            }
        })
        .await
        .map_err(surface_retryable)
    }

    /// Commit failures wrap their cause; retry decisions follow the cause.
    /// Only a failed storage commit is safe to redo; after it, the write landed.
    fn surface_retryable(err: RepositoryError) -> RepositoryError {
        match err {
            RepositoryError::Transaction(tx)
                if tx.step == "commit database transaction" && tx.cause.is_retryable() =>
            {
                RepositoryError::Transaction(tx).retryable()
            }
            other => other,
        }
    }

    // =============================================================================
    // DECORATOR CHAIN
    // =============================================================================

    #[tokio::test]
    async fn test_standard_chain_from_environment() {
        let store = InMemoryStore::new();
        let ctx = Context::background();
        let registry = Registry::new();
        let metrics = RepositoryMetrics::register(&registry).unwrap();
        let config = CoreConfig::from_lookup(|key| match key {
            "KG_CACHE_CAPACITY" => Some("16".to_string()),
            "KG_RETRY_MAX_ATTEMPTS" => Some("2".to_string()),
            _ => None,
        });

        let chain = DecoratorChain::standard(&config, metrics.clone());
        assert_eq!(chain.names(), vec!["logging", "metrics", "caching", "resilience"]);
        let nodes = chain.apply(store.direct_repositories().nodes);

        let saved = nodes.save(&ctx, &Node::new(user(), "decorated")).await.unwrap();
        for _ in 0..2 {
            let found = nodes.find_by_id(&ctx, &user(), &saved.id).await.unwrap();
            assert_eq!(found, saved);
        }
        let err = nodes
            .find_by_id(&ctx, &user(), &NodeId::new("missing"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        assert_eq!(metrics.operation_count("save", Outcome::Success), 1);
        assert_eq!(metrics.operation_count("find_by_id", Outcome::Success), 2);
        assert_eq!(metrics.operation_count("find_by_id", Outcome::NotFound), 1);
        let exposition = encode_text(&registry).unwrap();
        assert!(exposition.contains("kg_repository_cache_entries 1"));
    }

    // =============================================================================
    // RETRY
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_transient_commit_failures_are_retried() {
        let store = InMemoryStore::new();
        let bus = Arc::new(InMemoryEventBus::new());
        let ctx = Context::background();
        let config = RetryConfig::default()
            .with_max_attempts(3)
            .with_base_delay(Duration::from_millis(10))
            .without_jitter();
        let draft = Node::new(user(), "retried").with_id(NodeId::new("n-1"));

        store.fail_next_commit(RepositoryError::transient(TransientKind::Throttled, "slow down"));
        store.fail_next_commit(RepositoryError::transient(TransientKind::Timeout, "no answer"));

        let node = retry_with_backoff(&ctx, &config, || create_in_unit(&store, &bus, &ctx, &draft))
            .await
            .unwrap();

        assert_eq!(node.version, 1);
        assert_eq!(store.node_count(&user()), 1);
        // Failed attempts published nothing; the winner published once.
        assert_eq!(bus.events_published(), 1);
        assert_eq!(bus.batches_published(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max_attempts() {
        let store = InMemoryStore::new();
        let bus = Arc::new(InMemoryEventBus::new());
        let ctx = Context::background();
        let config = RetryConfig::default()
            .with_max_attempts(2)
            .with_base_delay(Duration::from_millis(10))
            .without_jitter();
        let draft = Node::new(user(), "unlucky");

        for _ in 0..2 {
            store.fail_next_commit(RepositoryError::transient(TransientKind::Unavailable, "down"));
        }

        let err = retry_with_backoff(&ctx, &config, || create_in_unit(&store, &bus, &ctx, &draft))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::RetryExhausted { attempts: 2, .. }));
        assert_eq!(store.node_count(&user()), 0);
        assert_eq!(bus.events_published(), 0);
    }

    // =============================================================================
    // CIRCUIT BREAKER
    // =============================================================================

    #[tokio::test]
    async fn test_breaker_stops_calling_failing_store() {
        let store = InMemoryStore::new();
        let bus = Arc::new(InMemoryEventBus::new());
        let ctx = Context::background();
        let breaker = CircuitBreaker::new(
            "node-store",
            CircuitBreakerConfig {
                max_failures: 2,
                ..Default::default()
            },
        );
        let draft = Node::new(user(), "guarded");
        for _ in 0..3 {
            store.fail_next_commit(RepositoryError::storage("disk full"));
        }

        for _ in 0..2 {
            let err = breaker
                .call(|| create_in_unit(&store, &bus, &ctx, &draft))
                .await
                .unwrap_err();
            assert!(matches!(err, RepositoryError::Transaction(_)));
        }
        assert_eq!(breaker.stats().state, CircuitState::Open);

        let err = breaker
            .call(|| create_in_unit(&store, &bus, &ctx, &draft))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::CircuitOpen { .. }));

        // The rejected call never reached the store: one failure is still queued.
        breaker.reset();
        assert!(breaker
            .call(|| create_in_unit(&store, &bus, &ctx, &draft))
            .await
            .is_err());
        breaker
            .call(|| create_in_unit(&store, &bus, &ctx, &draft))
            .await
            .unwrap();
        assert_eq!(store.node_count(&user()), 1);
    }

    // =============================================================================
    // BATCH
    // =============================================================================

    #[tokio::test]
    async fn test_batch_reports_each_item() {
        let store = InMemoryStore::new();
        let repos = store.direct_repositories();
        let ctx = Context::background();
        let executor = BatchExecutor::new(BatchConfig {
            max_concurrency: 4,
            stop_on_error: false,
        });

        let mut drafts: Vec<Node> = (0..20)
            .map(|i| Node::new(user(), format!("item {i}")).with_id(NodeId::new(format!("n-{i:02}"))))
            .collect();
        drafts[7].id = NodeId::new("n-03");

        let report = executor
            .execute(&ctx, drafts, |draft: Node| {
                let nodes = &repos.nodes;
                let ctx = &ctx;
                async move { nodes.save(ctx, &draft).await }
            })
            .await;

        assert_eq!(report.outcomes.len(), 20);
        assert_eq!(report.succeeded(), 19);
        assert_eq!(report.failed(), 1);
        assert!(report.first_error().unwrap().is_conflict());
        assert!(matches!(report.outcomes[0], ItemOutcome::Succeeded(_)));
        assert_eq!(store.node_count(&user()), 19);
    }
}
