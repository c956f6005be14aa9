//! Throughput of concurrent insertion for varying input sizes and worker counts.
//!
//! ```bash
//! cargo bench --bench concurrent_triangulation
//! ```
//!
//! Set `PAR_DELAUNAY_BENCH_LOG=1` to print run statistics (jobs, retries) once per case.

#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use par_delaunay::core::algorithms::spatial_sort::spatial_sort;
use par_delaunay::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;

/// Input sizes used across the benchmark groups
const COUNTS: &[usize] = &[1_000, 10_000, 50_000];

/// Worker counts compared for each input size
const WORKERS: &[usize] = &[1, 2, 4, 8];

/// Fixed seed so every run triangulates the same points.
const SEED: u64 = 0x00de_1a07;

fn bench_logging_enabled() -> bool {
    std::env::var("PAR_DELAUNAY_BENCH_LOG")
        .map(|value| value != "0")
        .unwrap_or(false)
}

fn random_points(count: usize) -> Vec<Point3> {
    let mut rng = StdRng::seed_from_u64(SEED);
    (0..count)
        .map(|_| {
            Point3::new([
                rng.random_range(0.0..1.0),
                rng.random_range(0.0..1.0),
                rng.random_range(0.0..1.0),
            ])
        })
        .collect()
}

fn bench_triangulate(c: &mut Criterion) {
    let mut group = c.benchmark_group("triangulate");
    group.sample_size(10);

    for &count in COUNTS {
        let points = random_points(count);
        group.throughput(Throughput::Elements(count as u64));
        for &workers in WORKERS {
            let config = TriangulatorConfigBuilder::default()
                .workers(workers)
                .build()
                .unwrap();
            let triangulator = Triangulator::new(config);

            if bench_logging_enabled() {
                let stats = *triangulator.triangulate(&points).unwrap().stats();
                eprintln!(
                    "n={count} K={workers}: {} jobs, {} retries, {:?}",
                    stats.total_jobs, stats.retries, stats.elapsed
                );
            }

            group.bench_with_input(
                BenchmarkId::new(format!("K{workers}"), count),
                &points,
                |b, points| b.iter(|| black_box(triangulator.triangulate(points).unwrap())),
            );
        }
    }
    group.finish();
}

fn bench_spatial_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("spatial_sort");
    for &count in COUNTS {
        let points = random_points(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &points, |b, points| {
            b.iter_batched(
                || points.clone(),
                |mut points| {
                    spatial_sort(&mut points);
                    black_box(points)
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_triangulate, bench_spatial_sort);
criterion_main!(benches);
