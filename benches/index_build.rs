//! Benchmarks for blocking index construction, pair generation and the
//! canonicalization hot path.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use entity_xref::test_support::generate_entities;
use entity_xref::{BlockingIndex, IndexOptions, Judgement, Resolver};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;
use std::time::Duration;

// =============================================================================
// INDEX BENCHMARKS
// =============================================================================

/// Tokenize and bucket entities, exact versus fuzzy.
fn bench_index_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_build");
    group.sample_size(20);
    group.warm_up_time(Duration::from_millis(500));

    for &count in &[1_000usize, 10_000] {
        let entities = generate_entities(count, 0.1, 42);
        group.throughput(Throughput::Elements(count as u64));
        for fuzzy in [false, true] {
            let label = if fuzzy { "fuzzy" } else { "exact" };
            group.bench_with_input(BenchmarkId::new(label, count), &entities, |b, entities| {
                b.iter(|| {
                    let options = IndexOptions {
                        fuzzy,
                        ..IndexOptions::default()
                    };
                    black_box(BlockingIndex::build(entities, options))
                })
            });
        }
    }
    group.finish();
}

/// Score and sort all candidate pairs of a built index.
fn bench_index_pairs(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_pairs");
    group.sample_size(20);

    for &count in &[1_000usize, 5_000] {
        let entities = generate_entities(count, 0.1, 7);
        let index = BlockingIndex::build(
            &entities,
            IndexOptions {
                fuzzy: true,
                max_bucket_size: 50,
                min_score: 0.0,
            },
        );
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("pairs", count), &index, |b, index| {
            b.iter(|| black_box(index.pairs().count()))
        });
    }
    group.finish();
}

// =============================================================================
// RESOLVER BENCHMARKS
// =============================================================================

/// Canonicalize every ID after random confirmed merges.
fn bench_canonicalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolver_canonicalize");
    group.sample_size(30);

    for &count in &[1_000usize, 10_000] {
        let ids: Vec<String> = (0..count).map(|i| format!("id{:07}", i)).collect();
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("all_ids", count), &ids, |b, ids| {
            b.iter_batched(
                || {
                    let mut rng = StdRng::seed_from_u64(42);
                    let mut resolver = Resolver::in_memory();
                    for _ in 0..ids.len() / 2 {
                        let a = &ids[rng.random_range(0..ids.len())];
                        let b = &ids[rng.random_range(0..ids.len())];
                        if a != b {
                            let _ = resolver.decide(a, b, Judgement::Confirmed, None);
                        }
                    }
                    resolver
                },
                |mut resolver| {
                    for id in ids {
                        black_box(resolver.canonicalize(id));
                    }
                },
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

criterion_group!(
    index_benches,
    bench_index_build,
    bench_index_pairs,
    bench_canonicalize
);
criterion_main!(index_benches);
