//! Benchmarks for the record normalizer and wire encoding
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use ndarray::ArrayD;
use serde_json::Value;
use windrelay::record::{normalize, RawSample};
use windrelay::wire::Envelope;

fn block(shape: &[usize]) -> RawSample {
    let len: usize = shape.iter().product();
    let values = (0..len).map(|i| i as f64 * 0.5).collect();
    RawSample::wrapped(ArrayD::from_shape_vec(shape.to_vec(), values).unwrap())
}

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");
    group.throughput(Throughput::Elements(1));

    let cases = [
        ("flat_44", block(&[44])),
        ("row_44", block(&[1, 44])),
        ("flat_1000", block(&[1000])),
        ("grid_8x16", block(&[8, 16])),
    ];

    for (name, sample) in &cases {
        group.bench_function(*name, |b| b.iter(|| normalize(black_box(sample))));
    }

    group.finish();
}

fn bench_json_input(c: &mut Criterion) {
    let mut group = c.benchmark_group("json_input");

    let line: Value = serde_json::from_str(&format!(
        "[[{}]]",
        (0..44).map(|i| i.to_string()).collect::<Vec<_>>().join(",")
    ))
    .unwrap();

    group.bench_function("parse_and_normalize", |b| {
        b.iter(|| {
            let sample = RawSample::from_json(black_box(&line)).unwrap();
            normalize(&sample)
        })
    });

    let record = normalize(&block(&[44])).unwrap();
    group.bench_function("encode_envelope", |b| {
        b.iter(|| Envelope::record("data", black_box(&record)).unwrap().encode().unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_normalize, bench_json_input);
criterion_main!(benches);
