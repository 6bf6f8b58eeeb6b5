//! NodeRun Store and Lifecycle Benchmarks
//!
//! Measures the in-memory store's compare-and-swap path and a full
//! create/complete lifecycle through the coordinator facade.

use arp_workspace::types::{JsonMap, NodeRun, NodeRunSpec, NodeRunState};
use arp_workspace::{InMemoryNodeRunStore, NodeRunStore, RunCoordinator};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::Duration;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Benchmark raw store operations
fn bench_store_operations(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("store_operations");
    group.throughput(Throughput::Elements(1));
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("put", |b| {
        let store = InMemoryNodeRunStore::new();
        b.to_async(&rt).iter(|| {
            let store = store.clone();
            async move {
                black_box(store.put(NodeRun::new(NodeRunSpec::new("add"))).await.unwrap())
            }
        })
    });

    group.bench_function("compare_and_swap", |b| {
        b.to_async(&rt).iter_batched(
            || {
                let store = InMemoryNodeRunStore::new();
                let node_run = NodeRun::new(NodeRunSpec::new("add"));
                (store, node_run)
            },
            |(store, node_run)| async move {
                let node_run = store.put(node_run).await.unwrap();
                let mut next = node_run.clone();
                next.state = NodeRunState::Running;
                black_box(
                    store
                        .compare_and_swap(&node_run.node_run_id, node_run.version, next)
                        .await
                        .unwrap(),
                )
            },
            criterion::BatchSize::SmallInput,
        )
    });

    group.finish();
}

/// Benchmark create-then-complete through the facade
fn bench_lifecycle(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("node_run_lifecycle");

    for batch in [1usize, 10, 100] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::new("create_complete", batch), &batch, |b, &batch| {
            let coordinator = RunCoordinator::default();
            b.to_async(&rt).iter(|| {
                let coordinator = coordinator.clone();
                async move {
                    let specs = (0..batch).map(|_| NodeRunSpec::new("add")).collect();
                    let created = coordinator.create_node_runs(specs).await.unwrap();
                    for node_run in created {
                        let mut outputs = JsonMap::new();
                        outputs.insert("result".into(), serde_json::json!(3));
                        black_box(
                            coordinator
                                .complete_node_run(&node_run.node_run_id, outputs)
                                .await
                                .unwrap(),
                        );
                    }
                }
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_store_operations, bench_lifecycle);
criterion_main!(benches);
