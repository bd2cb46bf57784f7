//! Criterion microbenches for detnorm's per-annotation hot paths.
//!
//! Run with: `cargo bench`
//!
//! These benchmarks measure the performance of:
//! - Label resolution through the full cascade
//! - Pixel to normalized box conversion
//! - The fuzzy similarity ratio
//! - Stratified partitioning

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;

use detnorm::geometry::{NormalizedBox, PixelBox};
use detnorm::labels::{similarity_ratio, LabelMapper};
use detnorm::model::ClassTaxonomy;
use detnorm::split::stratified_partition;

/// Labels that stop at different stages of the cascade.
const LABELS: &[&str] = &[
    "plastic",
    "Glass",
    "metl",
    "glass jar",
    "PET_bottle",
    "aluminium_can",
    "unknown_blob",
];

/// Benchmark label resolution, one pass over all sample labels.
fn bench_label_resolve(c: &mut Criterion) {
    let mapper = LabelMapper::new(ClassTaxonomy::default());
    let mut group = c.benchmark_group("labels");
    group.throughput(Throughput::Elements(LABELS.len() as u64));

    group.bench_function("resolve_cascade", |b| {
        b.iter(|| {
            for label in LABELS {
                black_box(mapper.resolve(black_box(label)));
            }
        })
    });

    group.bench_function("similarity_ratio", |b| {
        b.iter(|| black_box(similarity_ratio(black_box("cardbord box"), black_box("cardboard"))))
    });

    group.finish();
}

/// Benchmark box normalization for COCO-style XYWH input.
fn bench_box_conversion(c: &mut Criterion) {
    let boxes: Vec<PixelBox> = (0..1000)
        .map(|i| {
            let x = (i % 500) as f64;
            let y = (i % 300) as f64;
            PixelBox::from_xywh(x, y, 100.0, 50.0)
        })
        .collect();

    let mut group = c.benchmark_group("geometry");
    group.throughput(Throughput::Elements(boxes.len() as u64));

    group.bench_function("from_pixel", |b| {
        b.iter(|| {
            for bbox in &boxes {
                let _ = black_box(NormalizedBox::from_pixel(black_box(bbox), 640.0, 480.0));
            }
        })
    });

    group.finish();
}

/// Benchmark one stratified stage over 10k items in 6 classes.
fn bench_stratified_partition(c: &mut Criterion) {
    let keys: Vec<usize> = (0..10_000).map(|i| (i * 7) % 6).collect();
    let mut group = c.benchmark_group("split");
    group.throughput(Throughput::Elements(keys.len() as u64));

    group.bench_function("stratified_partition", |b| {
        b.iter(|| black_box(stratified_partition(black_box(&keys), 0.8, 42)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_label_resolve,
    bench_box_conversion,
    bench_stratified_partition
);
criterion_main!(benches);
