//! Hash-table benchmarks: insert growth, lookup, and scan throughput.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use corekv::dict::Dict;

fn bench_insert(c: &mut Criterion) {
    c.bench_function("dict_insert_100k", |b| {
        b.iter(|| {
            let mut d: Dict<u64, u64> = Dict::new();
            for i in 0..100_000u64 {
                d.add(black_box(i), i);
            }
            black_box(d.len())
        })
    });
}

fn bench_find(c: &mut Criterion) {
    let mut d: Dict<u64, u64> = Dict::new();
    for i in 0..100_000u64 {
        d.add(i, i);
    }
    c.bench_function("dict_find_hit", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i = (i + 7) % 100_000;
            black_box(d.get(&i))
        })
    });
}

fn bench_scan(c: &mut Criterion) {
    let mut d: Dict<u64, u64> = Dict::new();
    for i in 0..100_000u64 {
        d.add(i, i);
    }
    c.bench_function("dict_scan_full", |b| {
        b.iter(|| {
            let mut seen = 0usize;
            let mut cursor = 0u64;
            loop {
                cursor = d.scan(cursor, |_, _| seen += 1);
                if cursor == 0 {
                    break;
                }
            }
            black_box(seen)
        })
    });
}

criterion_group!(benches, bench_insert, bench_find, bench_scan);
criterion_main!(benches);
