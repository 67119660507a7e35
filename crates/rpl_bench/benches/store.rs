//! Log store benchmarks for both backends.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rpl_bench::utils::{generate_logs, temp_store};
use rpl_core::{Config, StoreKind, SyncMode};

const KINDS: [(StoreKind, &str); 2] = [(StoreKind::File, "file"), (StoreKind::Kv, "kv")];

fn config() -> Config {
    Config::default().sync_log(SyncMode::Never)
}

/// Benchmark appending one record at a time.
fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");
    group.sample_size(50);

    for (kind, name) in KINDS {
        for size in [64, 1024, 16384] {
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(BenchmarkId::new(name, size), &size, |b, &size| {
                let (_dir, store) = temp_store(kind, config());
                let payload = generate_logs(1, 1, size).remove(0).data;
                let mut log = generate_logs(1, 1, 0).remove(0);
                log.data = payload;

                b.iter(|| {
                    store.store_log(black_box(&log)).unwrap();
                    log.id += 1;
                });
            });
        }
    }

    group.finish();
}

/// Benchmark appending batches.
fn bench_append_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("append_batch");
    group.sample_size(30);

    for (kind, name) in KINDS {
        for batch in [10usize, 100] {
            group.throughput(Throughput::Elements(batch as u64));
            group.bench_with_input(BenchmarkId::new(name, batch), &batch, |b, &batch| {
                let (_dir, store) = temp_store(kind, config());
                let mut logs = generate_logs(1, batch, 256);

                b.iter(|| {
                    store.store_logs(black_box(&logs)).unwrap();
                    for log in &mut logs {
                        log.id += batch as u64;
                    }
                });
            });
        }
    }

    group.finish();
}

/// Benchmark point reads with the default cache and with a one-entry cache.
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_log");
    let count = 10_000u64;

    for (kind, name) in KINDS {
        for (label, config) in [("cached", config()), ("uncached", config().cache(1, 1))] {
            let (_dir, store) = temp_store(kind, config);
            store
                .store_logs(&generate_logs(1, count as usize, 256))
                .unwrap();

            group.bench_function(BenchmarkId::new(name, label), |b| {
                let mut id = 0;
                b.iter(|| {
                    id = id % count + 1;
                    let log = store.get_log(black_box(id)).unwrap();
                    black_box(log);
                });
            });
        }
    }

    group.finish();
}

/// Benchmark seeking into a store with ID gaps.
fn bench_seek(c: &mut Criterion) {
    let mut group = c.benchmark_group("seek_log");

    for (kind, name) in KINDS {
        let (_dir, store) = temp_store(kind, config().max_log_file_size(64 * 1024));
        for start in (1..1000u64).step_by(10) {
            store.store_logs(&generate_logs(start, 5, 128)).unwrap();
        }

        group.bench_function(name, |b| {
            let mut id = 0;
            b.iter(|| {
                id = (id + 7) % 990 + 1;
                let log = store.seek_log(black_box(id)).unwrap();
                black_box(log);
            });
        });
    }

    group.finish();
}

/// Benchmark purging the oldest records of a large store.
fn bench_purge(c: &mut Criterion) {
    let mut group = c.benchmark_group("purge");
    group.sample_size(10);

    for (kind, name) in KINDS {
        group.bench_function(name, |b| {
            b.iter_with_setup(
                || {
                    let (dir, store) = temp_store(kind, config().max_log_file_size(64 * 1024));
                    store.store_logs(&generate_logs(1, 5_000, 256)).unwrap();
                    (dir, store)
                },
                |(_dir, store)| store.purge(black_box(2_500)).unwrap(),
            );
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_append,
    bench_append_batch,
    bench_get,
    bench_seek,
    bench_purge,
);

criterion_main!(benches);
