//! # Unit of Work Flows
//!
//! Multi-entity writes through `UnitOfWork` over the in-memory store, with
//! events delivered through the shared bus:
//!
//! 1. **Atomic commit**: every write visible together, events after commit
//! 2. **Rollback**: failed work leaves neither data nor events
//! 3. **Commit races**: the second of two overlapping units loses
//! 4. **Saga**: external effects compensated in reverse order

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kg_04_unit_of_work::{
        CompensatingTransaction, InMemoryStore, UnitOfWork, UnitOfWorkState,
    };
    use shared_bus::{EventFilter, EventPublisher, EventTopic, InMemoryEventBus};
    use shared_types::{
        Context, DomainEvent, DomainEventKind, Edge, Node, NodeId, RepositoryError, TransientKind,
        UserId,
    };

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    fn user() -> UserId {
        UserId::new("user-1")
    }

    fn setup() -> (InMemoryStore, Arc<InMemoryEventBus>, UnitOfWork) {
        let store = InMemoryStore::new();
        let bus = Arc::new(InMemoryEventBus::new());
        let uow = UnitOfWork::over(store.clone(), bus.clone());
        (store, bus, uow)
    }

    // =============================================================================
    // ATOMIC COMMIT
    // =============================================================================

    #[tokio::test]
    async fn test_linked_pair_commits_with_events() {
        let (store, bus, mut uow) = setup();
        let mut all = bus.subscribe(EventFilter::all());
        let mut edges_only = bus.subscribe(EventFilter::topics(vec![EventTopic::Edge]));
        let ctx = Context::background();

        let direct = store.direct_repositories();
        let edge = uow
            .run(&ctx, |scope| {
                let ctx = ctx.clone();
                async move {
                    let nodes = &scope.repositories.nodes;
                    let a = nodes.save(&ctx, &Node::new(user(), "a")).await?;
                    let b = nodes.save(&ctx, &Node::new(user(), "b")).await?;
                    let edge = scope
                        .repositories
                        .edges
                        .save(&ctx, &Edge::new(user(), a.id.clone(), b.id.clone(), 0.8))
                        .await?;

                    // Nothing is visible outside the transaction yet.
                    assert!(direct.nodes.find_by_id(&ctx, &user(), &a.id).await.is_err());

                    scope.publish(DomainEvent::new(user(), DomainEventKind::NodeCreated { node_id: a.id }))?;
                    scope.publish(DomainEvent::new(user(), DomainEventKind::NodeCreated { node_id: b.id }))?;
                    scope.publish(DomainEvent::new(
                        user(),
                        DomainEventKind::EdgeCreated {
                            edge_id: edge.id.clone(),
                            source_id: edge.source_id.clone(),
                            target_id: edge.target_id.clone(),
                        },
                    ))?;
                    Ok::<_, RepositoryError>(edge)
                }
            })
            .await
            .unwrap();

        assert_eq!(uow.state(), UnitOfWorkState::Committed);
        assert_eq!(store.node_count(&user()), 2);
        assert_eq!(store.edge_count(&user()), 1);
        assert_eq!(store.open_transactions(), 0);

        let delivered = all.drain();
        assert_eq!(delivered.len(), 3);
        assert_eq!(delivered[2].name(), "edge.created");
        let edge_events = edges_only.drain();
        assert_eq!(edge_events.len(), 1);
        assert!(matches!(
            &edge_events[0].kind,
            DomainEventKind::EdgeCreated { edge_id, .. } if *edge_id == edge.id
        ));
        assert_eq!(bus.batches_published(), 1);
    }

    #[tokio::test]
    async fn test_writes_are_invisible_until_commit() {
        let (store, bus, mut uow) = setup();
        let ctx = Context::background();
        let direct = store.direct_repositories();

        uow.begin(&ctx).await.unwrap();
        let repos = uow.repositories().unwrap();
        let node = repos.nodes.save(&ctx, &Node::new(user(), "staged")).await.unwrap();

        assert!(repos.nodes.find_by_id(&ctx, &user(), &node.id).await.is_ok());
        let err = direct.nodes.find_by_id(&ctx, &user(), &node.id).await.unwrap_err();
        assert!(err.is_not_found());

        uow.publish_event(DomainEvent::new(user(), DomainEventKind::NodeCreated { node_id: node.id.clone() }))
            .unwrap();
        uow.commit(&ctx).await.unwrap();

        let stored = direct.nodes.find_by_id(&ctx, &user(), &node.id).await.unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(bus.events_published(), 1);
    }

    // =============================================================================
    // ROLLBACK
    // =============================================================================

    #[tokio::test]
    async fn test_failed_work_leaves_no_trace() {
        let (store, bus, mut uow) = setup();
        let mut sub = bus.subscribe(EventFilter::all());
        let ctx = Context::background();

        let err = uow
            .run(&ctx, |scope| async move {
                let node = scope
                    .repositories
                    .nodes
                    .save(&Context::background(), &Node::new(user(), "doomed"))
                    .await?;
                scope.publish(DomainEvent::new(user(), DomainEventKind::NodeCreated { node_id: node.id }))?;
                Err::<(), _>(RepositoryError::validation("content", "rejected by handler"))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RepositoryError::Validation { .. }));
        assert_eq!(uow.state(), UnitOfWorkState::RolledBack);
        assert_eq!(store.node_count(&user()), 0);
        assert_eq!(store.open_transactions(), 0);
        assert!(sub.drain().is_empty());
        assert_eq!(bus.batches_published(), 0);
    }

    #[tokio::test]
    async fn test_storage_commit_failure_publishes_nothing() {
        let (store, bus, mut uow) = setup();
        let ctx = Context::background();
        store.fail_next_commit(RepositoryError::transient(TransientKind::Unavailable, "store down"));

        let err = uow
            .run(&ctx, |scope| async move {
                let node = scope
                    .repositories
                    .nodes
                    .save(&Context::background(), &Node::new(user(), "n"))
                    .await?;
                scope.publish(DomainEvent::new(user(), DomainEventKind::NodeCreated { node_id: node.id }))?;
                Ok::<_, RepositoryError>(())
            })
            .await
            .unwrap_err();

        match err {
            RepositoryError::Transaction(tx) => {
                assert_eq!(tx.step, "commit database transaction");
                assert!(tx.cause.is_retryable());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(uow.state(), UnitOfWorkState::RolledBack);
        assert_eq!(store.node_count(&user()), 0);
        assert_eq!(bus.events_published(), 0);

        // The same unit of work serves the next attempt.
        uow.run(&ctx, |scope| async move {
            scope
                .repositories
                .nodes
                .save(&Context::background(), &Node::new(user(), "n"))
                .await
        })
        .await
        .unwrap();
        assert_eq!(store.node_count(&user()), 1);
    }

    // =============================================================================
    // COMMIT RACES
    // =============================================================================

    #[tokio::test]
    async fn test_second_overlapping_update_loses_at_commit() {
        let (store, bus, mut first) = setup();
        let mut second = UnitOfWork::over(store.clone(), bus.clone());
        let ctx = Context::background();
        let node = store
            .direct_repositories()
            .nodes
            .save(&ctx, &Node::new(user(), "v1"))
            .await
            .unwrap();

        first.begin(&ctx).await.unwrap();
        second.begin(&ctx).await.unwrap();

        let mut edit_a = node.clone();
        edit_a.content = "from first".into();
        let mut edit_b = node.clone();
        edit_b.content = "from second".into();

        // Both stage against version 1.
        first.repositories().unwrap().nodes.update(&ctx, &edit_a).await.unwrap();
        second.repositories().unwrap().nodes.update(&ctx, &edit_b).await.unwrap();

        first.commit(&ctx).await.unwrap();
        let err = second.commit(&ctx).await.unwrap_err();
        let conflict = err.version_conflict().unwrap();
        assert_eq!(conflict.expected_version, 1);
        assert_eq!(conflict.actual_version, 2);
        assert_eq!(second.state(), UnitOfWorkState::RolledBack);

        let stored = store
            .direct_repositories()
            .nodes
            .find_by_id(&ctx, &user(), &node.id)
            .await
            .unwrap();
        assert_eq!(stored.content, "from first");
        assert_eq!(stored.version, 2);
    }

    // =============================================================================
    // SAGA
    // =============================================================================

    #[tokio::test]
    async fn test_saga_compensates_completed_actions() {
        let store = InMemoryStore::new();
        let ctx = Context::background();
        let existing = store
            .direct_repositories()
            .nodes
            .save(&ctx, &Node::new(user(), "taken").with_id(NodeId::new("taken")))
            .await
            .unwrap();

        let mut saga = CompensatingTransaction::new();
        let (create, undo) = (store.direct_repositories(), store.direct_repositories());
        saga.add_action(
            "create node",
            move |ctx| async move { create.nodes.save(&ctx, &Node::new(user(), "fresh")).await },
            move |ctx, node: Node| async move { undo.nodes.delete(&ctx, &node.user_id, &node.id).await },
        );
        let duplicate = store.direct_repositories();
        saga.add_action(
            "create duplicate",
            move |ctx| async move {
                duplicate
                    .nodes
                    .save(&ctx, &Node::new(user(), "again").with_id(NodeId::new("taken")))
                    .await
            },
            |_ctx, _node: Node| async { Ok(()) },
        );

        let err = saga.execute(&ctx).await.unwrap_err();
        match err {
            RepositoryError::Transaction(tx) => {
                assert_eq!(tx.step, "create duplicate");
                assert!(tx.cause.is_conflict());
                assert!(tx.rollback_errors.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Only the pre-existing node remains.
        assert_eq!(store.node_count(&user()), 1);
        let page = store
            .direct_repositories()
            .nodes
            .find_by_user(&ctx, &user(), &Default::default())
            .await
            .unwrap();
        assert_eq!(page.items, vec![existing]);
    }
}
