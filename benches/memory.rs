use std::hint::black_box;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use futures::executor::block_on;

use cellrate::{GcraRateLimiter, MemoryStore, Rate, RateQuota};

/// A quota the benchmark can never exhaust: one nanosecond of cost per call
/// against a tolerance of a full millisecond.
fn unbounded_quota() -> RateQuota {
    RateQuota {
        max_rate: Rate::per_second(1_000_000_000),
        max_burst: 1_000_000,
    }
}

fn bench_hot_key_allowed(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory/hot_key_allowed");
    group.sample_size(200);

    group.bench_function("rate_limit", |b| {
        let limiter = GcraRateLimiter::new(MemoryStore::new(), unbounded_quota()).unwrap();

        block_on(limiter.rate_limit("k", 1)).unwrap();

        b.iter(|| {
            let result = block_on(limiter.rate_limit(black_box("k"), black_box(1)));
            black_box(result)
        });
    });

    group.finish();
}

fn bench_many_keys_allowed(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory/many_keys_allowed");
    group.sample_size(100);

    for key_space in [1_000_usize, 100_000] {
        group.bench_function(format!("rate_limit/keys={key_space}"), |b| {
            let limiter = GcraRateLimiter::new(MemoryStore::new(), unbounded_quota()).unwrap();

            let keys: Vec<String> = (0..key_space).map(|i| format!("user_{i}")).collect();

            let mut next = 0_usize;
            b.iter_batched(
                || {
                    next = next.wrapping_add(1);
                    next
                },
                |idx| {
                    let k = &keys[idx % keys.len()];
                    let result = block_on(limiter.rate_limit(black_box(k), black_box(1)));
                    black_box(result).unwrap();
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_denied_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory/denied_path");
    group.sample_size(200);

    group.bench_function("rate_limit", |b| {
        let quota = RateQuota {
            max_rate: Rate::per_hour(1),
            max_burst: 5,
        };
        let limiter = GcraRateLimiter::new(MemoryStore::new(), quota).unwrap();

        // Saturate the key so every measured call takes the denial path,
        // which reads but never writes.
        for _ in 0..7 {
            let _ = block_on(limiter.rate_limit("k", 1)).unwrap();
        }

        b.iter(|| {
            let result = block_on(limiter.rate_limit(black_box("k"), black_box(1)));
            black_box(result)
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_hot_key_allowed,
    bench_many_keys_allowed,
    bench_denied_path
);
criterion_main!(benches);
