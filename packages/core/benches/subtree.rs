//! Benchmarks for the tree engine's hot paths
//!
//! Run with: `cargo bench -p threadtree-core`
//!
//! - Subtree rendering (one range scan plus in-memory grouping)
//! - Reply insertion under a busy parent
//! - Rating updates

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tempfile::TempDir;
use threadtree_core::config::TreeConfig;
use threadtree_core::models::{ChildOrder, CommentPayload, NodeId};
use threadtree_core::services::TreeService;
use tokio::runtime::Runtime;

/// Setup a service with a fresh database and one owner
async fn setup_test_service() -> (TreeService<CommentPayload>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("bench.db");

    let service = TreeService::open(db_path, TreeConfig::default()).await.unwrap();
    service.register_owner("bench-post").await.unwrap();
    (service, temp_dir)
}

/// Build a thread of `fanout` replies per node, `levels` deep below the root
async fn build_thread(service: &TreeService<CommentPayload>, fanout: usize, levels: usize) -> NodeId {
    let root = service
        .create_root("bench-post", CommentPayload::new("op", "root"))
        .await
        .unwrap();

    let mut frontier = vec![root.id];
    for level in 0..levels {
        let mut next = Vec::with_capacity(frontier.len() * fanout);
        for parent in &frontier {
            for i in 0..fanout {
                let child = service
                    .add_child(*parent, CommentPayload::new("user", format!("l{} c{}", level, i)))
                    .await
                    .unwrap();
                next.push(child.id);
            }
        }
        frontier = next;
    }
    root.id
}

fn bench_render_subtree(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("render_subtree");
    group.sample_size(20);

    for (fanout, levels) in [(5usize, 2usize), (8, 3)] {
        let (service, _temp) = rt.block_on(setup_test_service());
        let root_id = rt.block_on(build_thread(&service, fanout, levels));

        for order in [ChildOrder::ByPath, ChildOrder::ByRank] {
            let id = BenchmarkId::new(format!("{:?}", order), format!("{}x{}", fanout, levels));
            group.bench_with_input(id, &root_id, |b, &root_id| {
                b.iter(|| {
                    rt.block_on(async {
                        black_box(service.get_subtree(root_id, order).await.unwrap())
                    })
                });
            });
        }
    }

    group.finish();
}

fn bench_add_child(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (service, _temp) = rt.block_on(setup_test_service());
    let root = rt
        .block_on(service.create_root("bench-post", CommentPayload::new("op", "root")))
        .unwrap();

    let mut group = c.benchmark_group("add_child");
    group.sample_size(20);
    group.bench_function("append_under_root", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(
                    service
                        .add_child(root.id, CommentPayload::new("user", "reply"))
                        .await
                        .unwrap(),
                )
            })
        });
    });
    group.finish();
}

fn bench_rating(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (service, _temp) = rt.block_on(setup_test_service());
    let root = rt
        .block_on(service.create_root("bench-post", CommentPayload::new("op", "root")))
        .unwrap();

    c.bench_function("increment_rating", |b| {
        b.iter(|| rt.block_on(async { black_box(service.increment_rating(root.id).await.unwrap()) }));
    });
}

criterion_group!(benches, bench_render_subtree, bench_add_child, bench_rating);
criterion_main!(benches);
