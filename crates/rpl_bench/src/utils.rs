//! Benchmark utilities.

use rand::Rng;
use rpl_core::{Config, Log, LogStore, StoreKind, COMPRESSION_NONE};
use std::sync::Arc;
use tempfile::TempDir;

/// Fixed creation time so runs are comparable.
pub const BENCH_TIME: u32 = 1_700_000_000;

/// Generate random payload data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate a compressible payload: repeated words with a random suffix.
pub fn text_data(size: usize) -> Vec<u8> {
    let mut data = b"replication log payload ".repeat(size / 24 + 1);
    data.truncate(size.saturating_sub(8));
    data.extend_from_slice(&random_data(size - data.len()));
    data
}

/// Generate records `first..first + count` with random payloads.
pub fn generate_logs(first: u64, count: usize, payload_size: usize) -> Vec<Log> {
    (first..first + count as u64)
        .map(|id| Log {
            id,
            create_time: BENCH_TIME,
            compression: COMPRESSION_NONE,
            data: random_data(payload_size),
        })
        .collect()
}

/// Open an empty store of `kind` in a fresh temporary directory.
///
/// The directory lives as long as the returned guard.
pub fn temp_store(kind: StoreKind, config: Config) -> (TempDir, Arc<dyn LogStore>) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let store = rpl_core::open_store(
        &temp_dir.path().join("store"),
        &config.store(kind),
        rpl_core::NoopLogger::shared(),
    )
    .expect("Failed to open store");
    (temp_dir, store)
}
