//! # Query Flows
//!
//! Queries built with `QueryBuilder`, checked by `QueryValidator` and run
//! against the in-memory store:
//!
//! 1. **Cursor walk**: every match exactly once, in sort order
//! 2. **User scope**: cursors and queries never cross partitions
//! 3. **Specification algebra**: composition agrees with boolean logic

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

    use kg_01_query::{
        QueryBuilder, QueryLimits, QueryOptions, QueryValidator, SortDirection, Specification,
    };
    use kg_04_unit_of_work::InMemoryStore;
    use shared_types::{Context, Node, NodeId, UserId};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    fn user() -> UserId {
        UserId::new("user-1")
    }

    /// Nodes n-00..n-24 one minute apart; every third lacks the "rust" keyword.
    async fn seeded() -> (InMemoryStore, Vec<Node>) {
        let store = InMemoryStore::new();
        let repos = store.direct_repositories();
        let ctx = Context::background();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let drafts: Vec<Node> = (0..25)
            .map(|i| {
                let keywords = if i % 3 == 0 { vec!["go"] } else { vec!["rust", "go"] };
                Node::new(user(), format!("note {i}"))
                    .with_id(NodeId::new(format!("n-{i:02}")))
                    .with_keywords(keywords)
                    .with_created_at(start + Duration::minutes(i))
            })
            .collect();
        let saved = repos.nodes.save_batch(&ctx, &drafts).await.unwrap();
        (store, saved)
    }

    // =============================================================================
    // CURSOR PAGING
    // =============================================================================

    #[tokio::test]
    async fn test_cursor_walk_visits_every_match_once() {
        let (store, saved) = seeded().await;
        let repos = store.direct_repositories();
        let ctx = Context::background();
        let validator = QueryValidator::new(QueryLimits::default());

        let base = QueryBuilder::new(user())
            .with_keyword("rust")
            .sort_by("created_at", SortDirection::Ascending)
            .limit(4);

        let mut seen = Vec::new();
        let mut pages = 0;
        let mut builder = base.clone();
        loop {
            let query = builder.build_query();
            validator.validate(&query).unwrap();
            let page = repos.nodes.find_page(&ctx, &query).await.unwrap();
            pages += 1;
            seen.extend(page.items.iter().map(|n| n.id.clone()));
            if !page.has_more {
                break;
            }
            builder = base.clone().cursor(page.next_cursor);
        }

        let expected: Vec<NodeId> = saved
            .iter()
            .filter(|n| n.keywords.iter().any(|k| k == "rust"))
            .map(|n| n.id.clone())
            .collect();
        assert_eq!(expected.len(), 16);
        assert_eq!(seen, expected);
        assert_eq!(pages, 4);
    }

    #[tokio::test]
    async fn test_walk_survives_concurrent_inserts() {
        let (store, _) = seeded().await;
        let repos = store.direct_repositories();
        let ctx = Context::background();

        let first = repos
            .nodes
            .find_by_user(
                &ctx,
                &user(),
                &QueryOptions::from_options(vec![kg_01_query::with_limit(10)]),
            )
            .await
            .unwrap();
        assert_eq!(first.len(), 10);

        // Newer than everything: sorts before the cursor, so never re-served.
        repos
            .nodes
            .save(&ctx, &Node::new(user(), "late").with_id(NodeId::new("late")))
            .await
            .unwrap();

        let mut options = QueryOptions::from_options(vec![kg_01_query::with_limit(100)]);
        options.cursor = Some(first.next_cursor.clone());
        let rest = repos.nodes.find_by_user(&ctx, &user(), &options).await.unwrap();

        assert_eq!(rest.len(), 15);
        assert!(!rest.has_more);
        assert!(rest.items.iter().all(|n| n.id.as_str() != "late"));
        assert!(first.items.iter().all(|a| rest.items.iter().all(|b| a.id != b.id)));
    }

    #[tokio::test]
    async fn test_cursor_is_bound_to_its_user() {
        let (store, _) = seeded().await;
        let repos = store.direct_repositories();
        let ctx = Context::background();

        let page = repos
            .nodes
            .find_page(&ctx, &QueryBuilder::new(user()).limit(5).build_query())
            .await
            .unwrap();
        assert!(page.has_more);

        let stranger = UserId::new("user-2");
        let query = QueryBuilder::new(stranger.clone())
            .cursor(page.next_cursor)
            .build_query();
        let err = repos.nodes.find_page(&ctx, &query).await.unwrap_err();
        assert!(matches!(err, shared_types::RepositoryError::Validation { .. }));

        let empty = repos
            .nodes
            .find_page(&ctx, &QueryBuilder::new(stranger).build_query())
            .await
            .unwrap();
        assert!(empty.is_empty());
        assert!(empty.next_cursor.is_empty());
    }

    #[test]
    fn test_validator_rejects_out_of_range_limit() {
        let validator = QueryValidator::new(QueryLimits::default());
        let query = QueryBuilder::new(user()).limit(0).build_query();
        assert!(validator.validate(&query).is_err());
        let query = QueryBuilder::new(user()).limit(10_001).build_query();
        assert!(validator.validate(&query).is_err());
    }

    // =============================================================================
    // SPECIFICATION ALGEBRA
    // =============================================================================

    const KEYWORDS: [&str; 4] = ["rust", "go", "zig", "c"];

    fn keyword_set() -> impl Strategy<Value = Vec<&'static str>> {
        proptest::sample::subsequence(KEYWORDS.to_vec(), 0..=KEYWORDS.len())
    }

    proptest! {
        #[test]
        fn test_composition_matches_boolean_logic(
            keywords in keyword_set(),
            a in 0..KEYWORDS.len(),
            b in 0..KEYWORDS.len(),
        ) {
            let node = Node::new(user(), "n").with_keywords(keywords);
            let left = Specification::keyword_contains(KEYWORDS[a]);
            let right = Specification::keyword_contains(KEYWORDS[b]);
            let l = left.is_satisfied_by(&node);
            let r = right.is_satisfied_by(&node);

            prop_assert_eq!(left.and(&right).is_satisfied_by(&node), l && r);
            prop_assert_eq!(left.or(&right).is_satisfied_by(&node), l || r);
            prop_assert_eq!(left.not().is_satisfied_by(&node), !l);
            prop_assert_eq!(
                left.and(&right).not().is_satisfied_by(&node),
                left.not().or(&right.not()).is_satisfied_by(&node)
            );
        }

        #[test]
        fn test_selectivity_stays_in_unit_interval(a in 0..KEYWORDS.len(), b in 0..KEYWORDS.len()) {
            let left = Specification::keyword_contains(KEYWORDS[a]);
            let right = Specification::tag_contains(KEYWORDS[b]);
            for spec in [left.and(&right), left.or(&right), left.not(), left.or(&right).not()] {
                let s = spec.selectivity();
                prop_assert!((0.0..=1.0).contains(&s), "selectivity {} out of range", s);
            }
        }

        #[test]
        fn test_builder_always_scopes_to_user(keyword in "[a-z]{1,8}") {
            let spec = QueryBuilder::new(user()).with_keyword(keyword.clone()).build();
            prop_assert!(spec.is_scoped_to(&user()));
            let mine = Node::new(user(), "n").with_keywords([keyword.clone()]);
            let theirs = Node::new(UserId::new("other"), "n").with_keywords([keyword]);
            prop_assert!(spec.is_satisfied_by(&mine));
            prop_assert!(!spec.is_satisfied_by(&theirs));
        }
    }
}
