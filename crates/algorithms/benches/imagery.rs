//! Benchmarks for imagery algorithms

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hexchange_algorithms::imagery::{median_composite, ndvi_array, IndexConfig};
use hexchange_core::{GeoTransform, CRS};
use ndarray::{Array2, Array4};

fn create_stack(size: usize, scenes: usize) -> Array4<f64> {
    Array4::from_shape_fn((2, scenes, size, size), |(band, t, row, col)| {
        if (row * 7 + col * 13 + t * 5) % 17 == 0 {
            return 0.0;
        }
        let base = if band == 0 { 0.05 } else { 0.30 };
        base + ((row * 7 + col * 13 + t * 3) % 200) as f64 / 1000.0
    })
}

fn bench_median_composite(c: &mut Criterion) {
    let mut group = c.benchmark_group("imagery/median_composite");
    group.sample_size(10);
    for size in [128, 256, 512] {
        let stack = create_stack(size, 24);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                median_composite(
                    black_box(stack.view()),
                    GeoTransform::new(0.0, size as f64 * 100.0, 100.0, -100.0),
                    CRS::from_epsg(3577),
                )
                .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_ndvi(c: &mut Criterion) {
    let mut group = c.benchmark_group("imagery/ndvi");
    for size in [256, 512, 1024, 2048] {
        let red = Array2::from_shape_fn((size, size), |(r, c)| 0.05 + ((r * 7 + c * 13) % 200) as f64 / 1000.0);
        let nir = Array2::from_shape_fn((size, size), |(r, c)| 0.30 + ((r * 3 + c * 11) % 200) as f64 / 1000.0);
        let valid = Array2::from_elem((size, size), true);
        let config = IndexConfig::default();
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                ndvi_array(
                    black_box(red.view()),
                    black_box(nir.view()),
                    valid.view(),
                    &config,
                )
                .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_median_composite, bench_ndvi);
criterion_main!(benches);
