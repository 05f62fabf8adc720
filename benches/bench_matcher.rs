//! Criterion benchmark for the Aho-Corasick matcher: compile time and scan
//! throughput across the four row formats.
//!
//! Run: cargo bench --bench bench_matcher

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use ringtap::matcher::{Automaton, AutomatonKind, RowFormat};

const PATTERNS: &[&str] = &[
    "malware", "exploit", "shellcode", "ATTACK", "payload", "overflow", "injection", "backdoor",
];

fn build(format: RowFormat) -> Automaton {
    let mut automaton = Automaton::new(AutomatonKind::Dfa, format);
    for (id, pattern) in PATTERNS.iter().enumerate() {
        automaton.add_pattern(id as u32, pattern.as_bytes(), true).unwrap();
    }
    automaton.compile().unwrap();
    automaton
}

fn haystack(len: usize) -> Vec<u8> {
    let filler = b"the quick brown fox jumps over the lazy dog GET /index.html HTTP/1.1 ";
    filler.iter().copied().cycle().take(len).collect()
}

fn bench_scan(c: &mut Criterion) {
    let data = haystack(64 * 1024);
    let formats = [
        ("full", RowFormat::Full),
        ("sparse", RowFormat::Sparse),
        ("banded", RowFormat::Banded),
        ("sparse_bands", RowFormat::SparseBands),
    ];

    let mut group = c.benchmark_group("matcher_scan");
    group.throughput(Throughput::Bytes(data.len() as u64));
    for (name, format) in formats {
        let automaton = build(format);
        group.bench_with_input(BenchmarkId::from_parameter(name), &automaton, |b, automaton| {
            b.iter(|| {
                let mut hits = 0usize;
                automaton
                    .search(black_box(&data), |_id, _pos| {
                        hits += 1;
                        false
                    })
                    .unwrap();
                black_box(hits)
            })
        });
    }
    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    c.bench_function("matcher_compile_dfa", |b| {
        b.iter(|| black_box(build(RowFormat::Banded)))
    });
}

criterion_group!(benches, bench_scan, bench_compile);
criterion_main!(benches);
