//! Criterion benchmark for the single-producer/single-consumer capture
//! ring: produce/consume throughput at a realistic slot size.
//!
//! Run: cargo bench --bench bench_ring

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use ringtap::ring::{CaptureHeader, CaptureRing};
use ringtap::RuntimeConfig;

fn ring(num_slots: usize, bucket_len: usize) -> CaptureRing {
    let config = RuntimeConfig::new()
        .with_num_slots(num_slots)
        .unwrap()
        .with_bucket_len(bucket_len)
        .unwrap();
    CaptureRing::new(&config).unwrap()
}

fn bench_produce_consume(c: &mut Criterion) {
    let payload = vec![0xABu8; 512];
    let ring = ring(4096, 1024);

    let mut group = c.benchmark_group("ring_produce_consume");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("round_trip", |b| {
        b.iter(|| {
            ring.try_produce(CaptureHeader::default(), black_box(&payload));
            ring.try_consume(|_hdr, bytes| {
                black_box(bytes);
            });
        })
    });
    group.finish();
}

criterion_group!(benches, bench_produce_consume);
criterion_main!(benches);
