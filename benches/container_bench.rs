#![allow(dead_code)]
//! Resolution benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ioc_kernel::container::{ExportStrategy, Scope, ScopeManager};

struct SimpleService {
    value: i32,
}

struct ComplexService {
    simple: std::sync::Arc<SimpleService>,
    name: String,
}

fn populated_manager(strategy_count: usize) -> ScopeManager {
    let manager = ScopeManager::new();
    for priority in 0..strategy_count {
        manager
            .root()
            .add_strategy(
                ExportStrategy::factory(move |_| Ok(SimpleService { value: priority as i32 }))
                    .priority(priority as i32)
                    .build(),
            )
            .unwrap();
    }
    manager
}

/// Resolution cost as the number of candidate strategies grows
fn bench_transient_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("transient_resolution");

    for strategy_count in [1, 10, 100].iter() {
        let manager = populated_manager(*strategy_count);
        group.bench_with_input(
            BenchmarkId::from_parameter(strategy_count),
            strategy_count,
            |b, _| {
                b.iter(|| black_box(manager.root().locate::<SimpleService>().unwrap()));
            },
        );
    }

    group.finish();
}

/// Singleton cache hits
fn bench_singleton_hit(c: &mut Criterion) {
    let manager = ScopeManager::new();
    manager
        .root()
        .add_strategy(
            ExportStrategy::factory(|_| Ok(SimpleService { value: 1 }))
                .singleton()
                .build(),
        )
        .unwrap();
    manager
        .root()
        .add_strategy(
            ExportStrategy::factory(|r| {
                Ok(ComplexService {
                    simple: r.locate::<SimpleService>()?,
                    name: "complex".to_string(),
                })
            })
            .build(),
        )
        .unwrap();

    c.bench_function("singleton_hit", |b| {
        b.iter(|| black_box(manager.root().locate::<SimpleService>().unwrap()));
    });
    c.bench_function("transient_with_singleton_dependency", |b| {
        b.iter(|| black_box(manager.root().locate::<ComplexService>().unwrap()));
    });
}

/// Lookups that walk a deep scope chain
fn bench_deep_scope_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("scope_chain_depth");

    for depth in [1usize, 8, 32].iter() {
        let manager = populated_manager(1);
        let mut leaf: Scope = manager.root().clone();
        for _ in 0..*depth {
            leaf = leaf.create_child_scope().unwrap();
        }

        group.bench_with_input(BenchmarkId::from_parameter(depth), depth, |b, _| {
            b.iter(|| black_box(leaf.locate::<SimpleService>().unwrap()));
        });
    }

    group.finish();
}

/// Child scope creation and disposal
fn bench_child_scope_lifecycle(c: &mut Criterion) {
    let manager = populated_manager(1);

    c.bench_function("child_scope_create_dispose", |b| {
        b.iter(|| {
            let child = manager.root().create_child_scope().unwrap();
            black_box(child.locate::<SimpleService>().unwrap());
            child.dispose();
        });
    });
}

criterion_group!(
    benches,
    bench_transient_resolution,
    bench_singleton_hit,
    bench_deep_scope_chain,
    bench_child_scope_lifecycle
);
criterion_main!(benches);
