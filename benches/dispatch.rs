//     ______   __  __     __         ______     ______
//    /\  == \ /\ \/\ \   /\ \       /\  ___\   /\  ___\
//    \ \  _-/ \ \ \_\ \  \ \ \____  \ \___  \  \ \  __\
//     \ \_\    \ \_____\  \ \_____\  \/\_____\  \ \_____\
//      \/_/     \/_____/   \/_____/   \/_____/   \/_____/
//
// Author: Colin MacRitchie / Ripple Group
// Benchmarks for the submission hot path
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use std::time::Duration;
use pulse_dispatch::{
    DispatchHooks, Dispatcher, DispatcherConfig, EventPriority, HookRegistry, NullHooks,
    OwnerAccounting, OwnerId, TaskOutcome, TierKind,
};

// Mock hooks for benchmarking
struct NoOpHooks;

impl DispatchHooks for NoOpHooks {
    fn on_submit(&self, _owner: &OwnerId, _tier: TierKind) {
        black_box(42);
    }

    fn on_completion(&self, _owner: &OwnerId, _elapsed: Duration, _outcome: &TaskOutcome) {
        black_box(42);
    }

    fn on_slow_task(&self, _owner: &OwnerId, _elapsed: Duration, _threshold: Duration) {
        black_box(42);
    }

    fn on_activity(&self, _owner: &OwnerId, _active: usize) {
        black_box(42);
    }
}

fn bench_accounting(c: &mut Criterion) {
    let mut group = c.benchmark_group("accounting");
    let accounting = OwnerAccounting::new();
    let owner = OwnerId::from("Bench");

    // Warm path: counter already exists
    drop(accounting.begin(&owner));
    group.bench_function("begin_release_existing", |b| {
        b.iter(|| drop(black_box(accounting.begin(&owner))));
    });

    group.bench_function("begin_release_fresh", |b| {
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            let fresh = OwnerAccounting::new();
            drop(black_box(fresh.begin(&OwnerId::from(format!("owner-{n}")))));
        });
    });

    group.finish();
}

fn bench_hook_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("hook_registry");
    let owner = OwnerId::from("Bench");

    let empty = HookRegistry::new();
    group.bench_function("no_hooks", |b| {
        b.iter(|| empty.on_submit(black_box(&owner), TierKind::Normal));
    });

    let null = HookRegistry::new();
    null.set_hooks(Arc::new(NullHooks));
    group.bench_function("null_hooks", |b| {
        b.iter(|| null.on_submit(black_box(&owner), TierKind::Normal));
    });

    let noop = HookRegistry::new();
    noop.set_hooks(Arc::new(NoOpHooks));
    group.bench_function("noop_hooks", |b| {
        b.iter(|| noop.on_submit(black_box(&owner), TierKind::Normal));
    });

    group.finish();
}

fn bench_submit(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatcher/submit");

    for batch in [1usize, 64, 1024] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            let dispatcher = Dispatcher::new(DispatcherConfig::default()).expect("dispatcher");
            let owner = OwnerId::from("Bench");

            b.iter(|| {
                for _ in 0..batch {
                    dispatcher
                        .submit(&owner, || Ok(()), EventPriority::Normal)
                        .expect("submit");
                }
            });

            dispatcher.shutdown();
        });
    }

    group.finish();
}

criterion_group!(benches, bench_accounting, bench_hook_registry, bench_submit);
criterion_main!(benches);
