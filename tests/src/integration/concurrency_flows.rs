//! # Concurrency Flows
//!
//! Version control and idempotency working against the in-memory store:
//!
//! 1. **CAS race**: two writers presenting the same version, one winner
//! 2. **Conflict recovery**: the loser re-reads and resolves per policy
//! 3. **Idempotent replay**: a repeated create returns the first result

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::sync::Barrier;

    use kg_02_concurrency::{
        ConflictPolicy, IdempotencyConfig, IdempotencyService, InMemoryIdempotencyStore,
        InMemoryVersionStore, OptimisticLockManager, UpdateKind,
    };
    use kg_04_unit_of_work::{InMemoryStore, RepositorySet};
    use shared_types::{Context, Node, NodeId, RepositoryError, RepositoryResult, UserId};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    fn user() -> UserId {
        UserId::new("user-1")
    }

    async fn create_once(
        service: &IdempotencyService,
        repositories: &RepositorySet,
        ctx: &Context,
        draft: &Node,
    ) -> RepositoryResult<Node> {
        let payload = (draft.content.as_str(), &draft.keywords);
        service
            .operation(&draft.user_id, "create_node", &payload, || {
                repositories.nodes.save(ctx, draft)
            })?
            .execute(ctx)
            .await
    }

    // =============================================================================
    // OPTIMISTIC LOCKING
    // =============================================================================

    #[tokio::test]
    async fn test_concurrent_writers_exactly_one_wins() {
        let versions = Arc::new(InMemoryVersionStore::new());
        let manager = OptimisticLockManager::new(versions.clone());
        let ctx = Context::background();
        let node = Node::new(user(), "shared");
        let barrier = Barrier::new(2);
        let saves = AtomicU32::new(0);

        // Both writers read the version before either compare-and-swaps.
        let write = || {
            manager.save_with_optimistic_lock(&ctx, &node, |_next| async {
                saves.fetch_add(1, Ordering::SeqCst);
                barrier.wait().await;
                Ok(())
            })
        };
        let (a, b) = tokio::join!(write(), write());

        let results = [a, b];
        let winners: Vec<u64> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
        assert_eq!(winners, vec![1]);

        let loser = results
            .iter()
            .find_map(|r| r.as_ref().err())
            .and_then(RepositoryError::version_conflict)
            .cloned()
            .unwrap();
        assert_eq!(loser.aggregate_id, node.id.as_str());
        assert_eq!(loser.expected_version, 0);
        assert_eq!(loser.actual_version, 1);

        // The losing save ran; only its version swap was refused.
        assert_eq!(saves.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stale_update_is_resolved_by_policy() {
        let store = InMemoryStore::new();
        let repos = store.direct_repositories();
        let ctx = Context::background();
        let policy = ConflictPolicy::default();

        let saved = repos
            .nodes
            .save(&ctx, &Node::new(user(), "draft").with_keywords(["rust"]))
            .await
            .unwrap();

        let mut first = saved.clone();
        first.keywords.push("async".into());
        let mut second = saved.clone();
        second.keywords.push("tokio".into());

        repos.nodes.update(&ctx, &first).await.unwrap();
        let err = repos.nodes.update(&ctx, &second).await.unwrap_err();
        let conflict = err.version_conflict().unwrap();
        assert_eq!(conflict.expected_version, 1);
        assert_eq!(conflict.actual_version, 2);

        let current = repos.nodes.find_by_id(&ctx, &user(), &saved.id).await.unwrap();
        let mut resolved = policy.resolve(UpdateKind::Keywords, &current, &second);
        assert_eq!(resolved.version, 3);
        // `update` takes the version being replaced.
        resolved.version = current.version;
        let stored = repos.nodes.update(&ctx, &resolved).await.unwrap();

        assert_eq!(stored.version, 3);
        assert_eq!(stored.keywords, vec!["rust", "async", "tokio"]);
    }

    #[tokio::test]
    async fn test_update_version_race_on_the_store() {
        let store = InMemoryStore::new();
        let repos = store.direct_repositories();
        let ctx = Context::background();
        let node = repos.nodes.save(&ctx, &Node::new(user(), "n")).await.unwrap();

        let owner = user();
        let (a, b) = tokio::join!(
            repos.nodes.update_version(&ctx, &owner, &node.id, 1),
            repos.nodes.update_version(&ctx, &owner, &node.id, 1),
        );
        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(e) if e.version_conflict().is_some())));

        let current = repos.nodes.find_by_id(&ctx, &user(), &node.id).await.unwrap();
        assert_eq!(current.version, 2);
    }

    // =============================================================================
    // IDEMPOTENCY
    // =============================================================================

    #[tokio::test]
    async fn test_repeated_create_replays_first_result() {
        let store = InMemoryStore::new();
        let repos = store.direct_repositories();
        let service = IdempotencyService::new(
            Arc::new(InMemoryIdempotencyStore::new()),
            IdempotencyConfig::default(),
        );
        let ctx = Context::background();
        let draft = Node::new(user(), "idempotent").with_id(NodeId::new("n-1"));

        let first = create_once(&service, &repos, &ctx, &draft).await.unwrap();
        // A second save of the same id would conflict; the replay never runs it.
        let second = create_once(&service, &repos, &ctx, &draft).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.version, 1);
        assert_eq!(store.node_count(&user()), 1);
        assert_eq!(service.store().record_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_create_is_not_recorded() {
        let store = InMemoryStore::new();
        let repos = store.direct_repositories();
        let service = IdempotencyService::new(
            Arc::new(InMemoryIdempotencyStore::new()),
            IdempotencyConfig::default(),
        );
        let ctx = Context::background();
        let taken = repos
            .nodes
            .save(&ctx, &Node::new(user(), "existing").with_id(NodeId::new("n-1")))
            .await
            .unwrap();

        let duplicate = Node::new(user(), "other").with_id(taken.id.clone());
        let err = create_once(&service, &repos, &ctx, &duplicate).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(service.store().record_count().await.unwrap(), 0);

        repos.nodes.delete(&ctx, &user(), &taken.id).await.unwrap();
        let created = create_once(&service, &repos, &ctx, &duplicate).await.unwrap();
        assert_eq!(created.content, "other");
        assert_eq!(service.store().record_count().await.unwrap(), 1);
    }
}
