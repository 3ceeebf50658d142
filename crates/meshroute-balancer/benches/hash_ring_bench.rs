// Criterion benchmarks for meshroute-balancer
//
// Run benchmarks with:
//   cargo bench -p meshroute-balancer
//
// For detailed output with plots:
//   cargo bench -p meshroute-balancer -- --save-baseline main

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use http::Uri;
use meshroute_balancer::hashing::{hash_key, HashRing, RingPointCache};
use meshroute_balancer::partition::{PartitionAccessor, PartitionAccessorRegistry};
use meshroute_common::properties::{HashAlgorithm, HashPartition, PartitionProperties};
use std::collections::HashMap;

fn hosts(count: usize) -> HashMap<Uri, f64> {
    (0..count)
        .map(|i| (format!("http://host-{}:8080/svc", i).parse().unwrap(), 1.0))
        .collect()
}

fn bench_ring_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_creation");

    for count in [3, 10, 50, 200].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let weights = hosts(count);
            b.iter(|| HashRing::from_weights(black_box(&weights), 100));
        });
    }

    group.finish();
}

fn bench_ring_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_rebuild");

    let weights = hosts(50);
    let points: HashMap<Uri, u32> = weights.keys().map(|host| (host.clone(), 100)).collect();
    let changed = weights.keys().next().cloned().unwrap();

    group.bench_function("full_with_cache", |b| {
        let mut cache = RingPointCache::new();
        b.iter(|| HashRing::with_cache(black_box(&points), &mut cache));
    });

    group.bench_function("one_host_incremental", |b| {
        let mut cache = RingPointCache::new();
        let ring = HashRing::with_cache(&points, &mut cache);
        b.iter(|| ring.with_host_points(black_box(&changed), 50, &mut cache));
    });

    group.finish();
}

fn bench_ring_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_lookup");

    for count in [3, 50, 200].iter() {
        let ring = HashRing::from_weights(&hosts(*count), 100);
        group.bench_with_input(BenchmarkId::new("get", count), &ring, |b, ring| {
            b.iter(|| ring.get(black_box(hash_key("member:12345"))));
        });
        group.bench_with_input(BenchmarkId::new("ordered_3", count), &ring, |b, ring| {
            b.iter(|| {
                ring.ordered_hosts(black_box(hash_key("member:12345")))
                    .take(3)
                    .count()
            });
        });
    }

    group.finish();
}

fn bench_hash_partitioning(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_partitioning");

    for algorithm in [HashAlgorithm::Md5, HashAlgorithm::XxHash] {
        let accessor = PartitionAccessor::build(
            &PartitionProperties::Hash(HashPartition {
                key_regex: "(.*)".to_string(),
                partition_count: 64,
                hash_algorithm: algorithm,
            }),
            &PartitionAccessorRegistry::new(),
        )
        .unwrap();
        group.bench_function(format!("{:?}", algorithm), |b| {
            b.iter(|| accessor.partition_id(black_box("aVeryVeryVeryLongKey")));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_ring_creation,
    bench_ring_rebuild,
    bench_ring_lookup,
    bench_hash_partitioning
);
criterion_main!(benches);
