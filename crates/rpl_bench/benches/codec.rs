//! Record codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rpl_bench::utils::{generate_logs, text_data};
use rpl_core::{Log, LogHead, COMPRESSION_SNAPPY, LOG_HEAD_SIZE};

const SIZES: [usize; 4] = [0, 256, 4096, 65536];

/// Benchmark encoding records of different payload sizes.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for size in SIZES {
        let log = generate_logs(1, 1, size).remove(0);
        group.throughput(Throughput::Bytes(log.size() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &log, |b, log| {
            b.iter(|| {
                let bytes = black_box(log).marshal().unwrap();
                black_box(bytes);
            });
        });
    }

    group.finish();
}

/// Benchmark encoding into a reused buffer.
fn bench_encode_reuse(c: &mut Criterion) {
    let logs = generate_logs(1, 100, 256);

    c.bench_function("encode_batch_reuse_100x256", |b| {
        let mut buf = Vec::with_capacity(logs.iter().map(Log::size).sum());
        b.iter(|| {
            buf.clear();
            for log in &logs {
                log.encode(&mut buf).unwrap();
            }
            black_box(buf.len());
        });
    });
}

/// Benchmark full decoding and head-only decoding.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for size in SIZES {
        let bytes = generate_logs(1, 1, size).remove(0).marshal().unwrap();
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &bytes, |b, bytes| {
            b.iter(|| {
                let log = Log::unmarshal(black_box(bytes)).unwrap();
                black_box(log);
            });
        });
    }

    group.bench_function("head_only", |b| {
        let bytes = generate_logs(1, 1, 4096).remove(0).marshal().unwrap();
        b.iter(|| {
            let head = LogHead::parse(black_box(&bytes[..LOG_HEAD_SIZE])).unwrap();
            black_box(head);
        });
    });

    group.finish();
}

/// Benchmark decompressing snappy payloads as consumers do.
fn bench_uncompress(c: &mut Criterion) {
    let mut group = c.benchmark_group("uncompress");

    for size in [256, 4096, 65536] {
        let raw = text_data(size);
        let log = Log {
            id: 1,
            create_time: 0,
            compression: COMPRESSION_SNAPPY,
            data: snap_compress(&raw),
        };
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &log, |b, log| {
            b.iter(|| {
                let data = black_box(log).uncompressed_data().unwrap();
                black_box(data.len());
            });
        });
    }

    group.finish();
}

/// Compresses through a throwaway driver so the bench uses the same encoder.
fn snap_compress(raw: &[u8]) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let rpl = rpl_core::Replication::open_with_logger(
        rpl_core::Config::new(dir.path())
            .compression(true)
            .expired_log_days(0),
        rpl_core::NoopLogger::shared(),
    )
    .unwrap();
    let data = rpl.log(raw).unwrap().data;
    rpl.close().unwrap();
    data
}

criterion_group!(
    benches,
    bench_encode,
    bench_encode_reuse,
    bench_decode,
    bench_uncompress,
);

criterion_main!(benches);
