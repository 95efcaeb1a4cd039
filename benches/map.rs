use std::hint::black_box;
use std::thread;

use coordmap::SortedMap;
use criterion::{Criterion, criterion_group, criterion_main};

fn filled(n: u64) -> SortedMap<u64, u64> {
    (0..n).map(|k| (k, k * 2)).collect()
}

fn bench_single_thread(c: &mut Criterion) {
    let map = filled(1024);

    c.bench_function("get_hit", |b| b.iter(|| map.get(black_box(&512))));
    c.bench_function("contains_key_miss", |b| b.iter(|| map.contains_key(black_box(&4096))));
    c.bench_function("set_overwrite", |b| b.iter(|| map.set(black_box(512), 1024)));
}

fn bench_contended_reads(c: &mut Criterion) {
    let map = filled(1024);

    c.bench_function("get_4_readers", |b| {
        b.iter(|| {
            thread::scope(|scope| {
                for t in 0..4u64 {
                    let map = &map;
                    scope.spawn(move || {
                        for k in 0..256u64 {
                            black_box(map.get(&((k * 4 + t) % 1024)));
                        }
                    });
                }
            })
        })
    });
}

criterion_group!(benches, bench_single_thread, bench_contended_reads);
criterion_main!(benches);
