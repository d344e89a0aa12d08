//! Benchmarks for record encoding and decoding.

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use streamharness::codec::{decode, encode, encode_into, Record};
use streamharness::generator::{CompositeResultGenerator, HitGenerator};

fn hit_benchmark(c: &mut Criterion) {
    let hits: Vec<Record> = HitGenerator::seeded(1).take(1_000).collect();
    let encoded: Vec<_> = hits.iter().map(|h| encode(h).unwrap()).collect();

    let mut group = c.benchmark_group("hit");
    group.throughput(Throughput::Elements(hits.len() as u64));
    group.bench_function("encode", |b| {
        let mut buf = BytesMut::with_capacity(32 * hits.len());
        b.iter(|| {
            buf.clear();
            for hit in &hits {
                encode_into(black_box(hit), &mut buf).unwrap();
            }
        });
    });
    group.bench_function("decode", |b| {
        b.iter(|| {
            for bytes in &encoded {
                black_box(decode(black_box(bytes)).unwrap());
            }
        });
    });
    group.finish();
}

fn composite_benchmark(c: &mut Criterion) {
    let mut generator = CompositeResultGenerator::seeded(2).with_children(8..=32);
    let results: Vec<Record> = (0..200).map(|_| generator.next_result().into()).collect();
    let encoded: Vec<_> = results.iter().map(|r| encode(r).unwrap()).collect();

    let mut group = c.benchmark_group("composite");
    group.throughput(Throughput::Elements(results.len() as u64));
    group.bench_function("encode", |b| {
        b.iter(|| {
            for result in &results {
                black_box(encode(black_box(result)).unwrap());
            }
        });
    });
    group.bench_function("decode", |b| {
        b.iter(|| {
            for bytes in &encoded {
                black_box(decode(black_box(bytes)).unwrap());
            }
        });
    });
    group.finish();
}

criterion_group!(benches, hit_benchmark, composite_benchmark);
criterion_main!(benches);
