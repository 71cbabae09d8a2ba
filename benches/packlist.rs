//! Packed-entry-list benchmarks: pushes, traversal, and the cascade path.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use corekv::packlist::PackList;

fn bench_push_tail(c: &mut Criterion) {
    c.bench_function("packlist_push_tail_1k", |b| {
        b.iter(|| {
            let mut pl = PackList::new();
            for i in 0..1_000 {
                pl.push_tail(black_box(format!("value-{i}").as_bytes()))
                    .unwrap();
            }
            black_box(pl.blob_len())
        })
    });
}

fn bench_traverse(c: &mut Criterion) {
    let mut pl = PackList::new();
    for i in 0..1_000 {
        pl.push_tail(format!("{i}").as_bytes()).unwrap();
    }
    c.bench_function("packlist_walk_1k", |b| {
        b.iter(|| {
            let mut n = 0usize;
            let mut p = pl.head_offset();
            while let Some(off) = p {
                black_box(pl.get(off));
                n += 1;
                p = pl.next(off);
            }
            black_box(n)
        })
    });
}

fn bench_cascade(c: &mut Criterion) {
    c.bench_function("packlist_prepend_cascade_200", |b| {
        let payload = vec![b'x'; 247];
        b.iter(|| {
            let mut pl = PackList::new();
            for _ in 0..200 {
                pl.push_tail(&payload).unwrap();
            }
            pl.push_head(black_box(&vec![b'y'; 297])).unwrap();
            black_box(pl.blob_len())
        })
    });
}

criterion_group!(benches, bench_push_tail, bench_traverse, bench_cascade);
criterion_main!(benches);
