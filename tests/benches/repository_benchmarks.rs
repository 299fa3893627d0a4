//! # Repository Core Benchmarks
//!
//! | Area | Operation | Target |
//! |------|-----------|--------|
//! | kg-01 Query | Specification match per node | < 1µs |
//! | kg-01 Query | Cursor encode + decode | < 10µs |
//! | kg-04 Unit of Work | In-memory page of 50 from 10k nodes | < 10ms |
//! | kg-04 Unit of Work | Commit of a 10-node unit | < 1ms |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

use kg_01_query::{
    decode_cursor, encode_cursor, QueryBuilder, ResumeKey, SortDirection, Specification,
};
use kg_04_unit_of_work::{InMemoryStore, UnitOfWork};
use shared_bus::InMemoryEventBus;
use shared_types::{Context, DomainEvent, DomainEventKind, Node, UserId};

const KEYWORDS: [&str; 8] = ["rust", "go", "zig", "c", "ocaml", "haskell", "java", "lua"];

fn nodes(user: &UserId, count: usize) -> Vec<Node> {
    (0..count)
        .map(|i| {
            Node::new(user.clone(), format!("note {i}"))
                .with_keywords([KEYWORDS[i % KEYWORDS.len()], KEYWORDS[(i / 3) % KEYWORDS.len()]])
        })
        .collect()
}

// ============================================================================
// KG-01: Query
// ============================================================================

fn bench_specification_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("kg-01-specification");
    let user = UserId::new("bench");
    let sample = nodes(&user, 1_000);

    let simple = Specification::keyword_contains("rust");
    let composed = QueryBuilder::new(user.clone())
        .with_any_keyword(["rust", "zig"])
        .matching(&Specification::content_contains("note 9").not())
        .build();

    group.throughput(Throughput::Elements(sample.len() as u64));
    group.bench_function("keyword_contains", |b| {
        b.iter(|| sample.iter().filter(|n| simple.is_satisfied_by(*n)).count())
    });
    group.bench_function("composed_user_scoped", |b| {
        b.iter(|| sample.iter().filter(|n| composed.is_satisfied_by(*n)).count())
    });
    group.finish();
}

fn bench_cursor_codec(c: &mut Criterion) {
    let mut key = ResumeKey::new();
    key.insert("user_id".into(), "bench".into());
    key.insert("id".into(), "3f1c2a7e-5b0d-4e59-9a61-0c8e4f2b7d10".into());
    key.insert("sort.created_at".into(), "2024-01-01T00:00:00Z".into());

    c.bench_function("kg-01-cursor/round_trip", |b| {
        b.iter(|| {
            let token = encode_cursor(black_box(&key)).unwrap();
            decode_cursor(&token).unwrap()
        })
    });
}

// ============================================================================
// KG-04: Unit of Work
// ============================================================================

fn bench_in_memory_paging(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("kg-04-find-page");
    group.measurement_time(Duration::from_secs(10));

    for size in [1_000usize, 10_000] {
        let store = InMemoryStore::new();
        let user = UserId::new("bench");
        let ctx = Context::background();
        let repos = store.direct_repositories();
        rt.block_on(repos.nodes.save_batch(&ctx, &nodes(&user, size))).unwrap();

        let query = QueryBuilder::new(user.clone())
            .with_keyword("rust")
            .sort_by("created_at", SortDirection::Descending)
            .limit(50)
            .build_query();

        group.bench_with_input(BenchmarkId::new("keyword_page", size), &query, |b, query| {
            b.to_async(&rt)
                .iter(|| async { repos.nodes.find_page(&ctx, query).await.unwrap() })
        });
    }
    group.finish();
}

fn bench_unit_of_work_commit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();
    let bus = std::sync::Arc::new(InMemoryEventBus::new());
    let user = UserId::new("bench");
    let ctx = Context::background();

    c.bench_function("kg-04-unit-of-work/commit_10_nodes", |b| {
        b.to_async(&rt).iter(|| async {
            let mut uow = UnitOfWork::over(store.clone(), bus.clone());
            let drafts = nodes(&user, 10);
            uow.run(&ctx, |scope| async move {
                let ctx = Context::background();
                let saved = scope.repositories.nodes.save_batch(&ctx, &drafts).await?;
                for node in &saved {
                    scope.publish(DomainEvent::new(
                        node.user_id.clone(),
                        DomainEventKind::NodeCreated {
                            node_id: node.id.clone(),
                        },
                    ))?;
                }
                Ok::<_, shared_types::RepositoryError>(saved.len())
            })
            .await
            .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_specification_matching,
    bench_cursor_codec,
    bench_in_memory_paging,
    bench_unit_of_work_commit,
);
criterion_main!(benches);
