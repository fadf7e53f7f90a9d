use esox_connpool::{ConcurrencyPolicy, ConnPool, DropConnection, PoolConfiguration};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::thread;

const POLICIES: [ConcurrencyPolicy; 3] = [
    ConcurrencyPolicy::Strict,
    ConcurrencyPolicy::Lax,
    ConcurrencyPolicy::RouteSegmented,
];

fn pool(policy: ConcurrencyPolicy) -> ConnPool<u16, u64> {
    ConnPool::new(
        PoolConfiguration::default()
            .with_concurrency_policy(policy)
            .with_max_total(512)
            .with_default_max_per_route(8),
        DropConnection,
    )
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut single = c.benchmark_group("lease_release");
    for policy in POLICIES {
        single.bench_with_input(BenchmarkId::from_parameter(policy), &policy, |b, &policy| {
            let pool = pool(policy);
            b.iter(|| {
                let entry = pool.lease(black_box(443), None).unwrap().wait_blocking().unwrap();
                pool.release(&entry, true).unwrap();
            })
        });
    }
    single.finish();

    // many routes, many threads: where the global lock starts to hurt
    let mut contended = c.benchmark_group("lease_release_64_routes_8_threads");
    for policy in POLICIES {
        contended.bench_with_input(BenchmarkId::from_parameter(policy), &policy, |b, &policy| {
            let pool = pool(policy);
            b.iter(|| {
                thread::scope(|scope| {
                    for worker in 0..8u16 {
                        let pool = &pool;
                        scope.spawn(move || {
                            for i in 0..64u16 {
                                let route = (worker * 8 + i) % 64;
                                let entry = pool.lease(route, None).unwrap().wait_blocking().unwrap();
                                pool.release(&entry, true).unwrap();
                            }
                        });
                    }
                });
            })
        });
    }
    contended.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
