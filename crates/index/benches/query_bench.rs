//! Index build and region query benchmarks.
//!
//! Measures build throughput, cone queries against a warm and a cold cache,
//! and whole-sky enumeration on an on-disk bundle.

#![allow(clippy::expect_used, missing_docs)]

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use starmap_index::{Cone, Index, WholeSky};
use starmap_test_utils::strategies::random_catalog;
use starmap_types::IndexConfig;
use tempfile::TempDir;

// =============================================================================
// Helpers
// =============================================================================

fn config() -> IndexConfig {
    IndexConfig::builder()
        .leaf_capacity(128)
        .max_depth(12)
        .sync_on_seal(false)
        .build()
        .expect("valid config")
}

/// Builds a bundle of `count` uniformly spread stars and returns its directory.
fn build_bundle(count: usize) -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("bench.starmap");
    let mut index = Index::create(&path, config()).expect("create index");
    index.build(random_catalog(42, count)).expect("build index");
    (dir, path)
}

// =============================================================================
// Build
// =============================================================================

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("index/build");
    group.sample_size(10);

    for count in [10_000, 100_000] {
        let stars = random_catalog(7, count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("in_memory", count), &stars, |b, stars| {
            b.iter(|| {
                let mut index = Index::in_memory(config()).expect("in-memory index");
                index.build(stars.iter().copied()).expect("build");
                black_box(index.star_count())
            });
        });
    }

    group.finish();
}

// =============================================================================
// Queries
// =============================================================================

fn bench_cone_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("index/cone_query");
    let (_dir, path) = build_bundle(200_000);
    let warm = Index::open(&path, config()).expect("open index");

    for radius_deg in [0.5, 2.0, 10.0] {
        let cone = Cone::from_degrees(83.8, -5.4, radius_deg);
        let hits = warm.count(&cone).expect("warm up");
        group.throughput(Throughput::Elements(hits.max(1)));

        group.bench_with_input(BenchmarkId::new("warm", radius_deg), &cone, |b, cone| {
            b.iter(|| black_box(warm.count(cone).expect("query")));
        });

        group.bench_with_input(BenchmarkId::new("cold", radius_deg), &cone, |b, cone| {
            b.iter(|| {
                let cold = Index::open(&path, config()).expect("open index");
                black_box(cold.count(cone).expect("query"))
            });
        });
    }

    group.finish();
}

fn bench_whole_sky(c: &mut Criterion) {
    let mut group = c.benchmark_group("index/whole_sky");
    group.sample_size(10);
    let (_dir, path) = build_bundle(100_000);
    let index = Index::open(&path, config()).expect("open index");
    group.throughput(Throughput::Elements(100_000));

    group.bench_function("enumerate_100k", |b| {
        b.iter(|| black_box(index.count(&WholeSky).expect("query")));
    });

    group.finish();
}

criterion_group!(benches, bench_build, bench_cone_query, bench_whole_sky);
criterion_main!(benches);
