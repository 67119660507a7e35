//! Replication driver benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rpl_bench::utils::{random_data, text_data};
use rpl_core::{Config, NoopLogger, Replication, StoreKind, SyncMode};
use tempfile::TempDir;

fn open(kind: StoreKind, compression: bool) -> (TempDir, Replication) {
    let dir = TempDir::new().unwrap();
    let config = Config::new(dir.path())
        .store(kind)
        .compression(compression)
        .expired_log_days(0)
        .sync_log(SyncMode::Never);
    let rpl = Replication::open_with_logger(config, NoopLogger::shared()).unwrap();
    (dir, rpl)
}

/// Benchmark `log` with and without compression.
fn bench_log(c: &mut Criterion) {
    let mut group = c.benchmark_group("log");
    group.sample_size(50);

    for (kind, name) in [(StoreKind::File, "file"), (StoreKind::Kv, "kv")] {
        for compression in [false, true] {
            let label = format!("{name}/{}", if compression { "snappy" } else { "raw" });
            let data = text_data(1024);
            group.throughput(Throughput::Bytes(data.len() as u64));
            group.bench_function(BenchmarkId::from_parameter(label), |b| {
                let (_dir, rpl) = open(kind, compression);
                b.iter(|| {
                    let log = rpl.log(black_box(&data)).unwrap();
                    black_box(log.id);
                });
            });
        }
    }

    group.finish();
}

/// Benchmark a follower draining the commit cursor.
fn bench_commit_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit_drain");
    group.sample_size(10);

    for count in [100u64, 1000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter_with_setup(
                || {
                    let (dir, rpl) = open(StoreKind::File, false);
                    let data = random_data(128);
                    for _ in 0..count {
                        rpl.log(&data).unwrap();
                    }
                    (dir, rpl)
                },
                |(_dir, rpl)| {
                    while let Ok(log) = rpl.next_need_commit_log() {
                        rpl.update_commit_id(log.id).unwrap();
                    }
                },
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_log, bench_commit_drain);

criterion_main!(benches);
