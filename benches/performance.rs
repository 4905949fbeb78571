//! Performance benchmarks for the data router.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use crossbeam_channel::unbounded;
use datarouter::{Data, Request, Store, Write};

fn batch(measurements: usize) -> Vec<Data> {
    (0..measurements)
        .map(|i| Data::at(format!("m{}", i), "42.0", 1_700_000_000))
        .collect()
}

/// Benchmark writes with varying batch sizes and no subscribers
fn bench_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("write");

    for size in [1, 10, 100] {
        group.bench_with_input(BenchmarkId::new("batch_size", size), &size, |b, &size| {
            let store = Store::new();
            let datapoints = batch(size);

            b.iter(|| {
                black_box(store.write(Write::new("node", datapoints.clone())));
            });
        });
    }

    group.finish();
}

/// Benchmark fan-out to varying subscriber counts
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");

    for subscribers in [1, 10, 100] {
        group.bench_with_input(
            BenchmarkId::new("subscribers", subscribers),
            &subscribers,
            |b, &subscribers| {
                let store = Store::new();
                store.write(Write::new("node", batch(1)));

                let (tx, rx) = unbounded();
                for _ in 0..subscribers {
                    store
                        .subscribe(Request::new("node", ["m0"], tx.clone()))
                        .unwrap();
                }

                b.iter(|| {
                    store.write(Write::new("node", batch(1)));
                    // Keep the channel from growing without bound
                    for reply in rx.try_iter() {
                        black_box(reply);
                    }
                });
            },
        );
    }

    group.finish();
}

/// Benchmark immediate reads
fn bench_read_immediate(c: &mut Criterion) {
    let store = Store::new();
    store.write(Write::new("node", batch(100)));
    let (tx, rx) = unbounded();

    c.bench_function("read_immediate_10_of_100", |b| {
        b.iter(|| {
            let measurements = (0..10).map(|i| format!("m{}", i * 10));
            store
                .read_immediate(Request::new("node", measurements, tx.clone()))
                .unwrap();
            black_box(rx.recv().unwrap());
        });
    });
}

criterion_group!(benches, bench_write, bench_fanout, bench_read_immediate);
criterion_main!(benches);
