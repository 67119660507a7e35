//! Temporary stores and replication drivers.
//!
//! Every fixture owns its temporary directory, so the files disappear when
//! the fixture is dropped.

use rpl_core::{open_store, Config, Log, LogStore, NoopLogger, Replication, StoreKind};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// `create_time` of every record built by [`sample_log`].
pub const SAMPLE_TIME: u32 = 1_000_000;

/// A deterministic uncompressed record.
pub fn sample_log(id: u64) -> Log {
    log_at(id, SAMPLE_TIME)
}

/// A deterministic uncompressed record created at `create_time`.
pub fn log_at(id: u64, create_time: u32) -> Log {
    Log {
        id,
        create_time,
        compression: 0,
        data: format!("log-{id}").into_bytes(),
    }
}

/// [`sample_log`] for every ID in `ids`.
pub fn sample_logs(ids: RangeInclusive<u64>) -> Vec<Log> {
    ids.map(sample_log).collect()
}

/// A log store in a temporary directory.
pub struct TestStore {
    /// The store instance.
    pub store: Arc<dyn LogStore>,
    config: Config,
    dir: PathBuf,
    /// Kept alive to prevent cleanup.
    _temp_dir: TempDir,
}

impl TestStore {
    /// Opens an empty store of `kind` with default settings.
    pub fn open(kind: StoreKind) -> Self {
        Self::with_config(Config::default().store(kind))
    }

    /// Opens an empty segmented file store.
    pub fn file() -> Self {
        Self::open(StoreKind::File)
    }

    /// Opens an empty KV store.
    pub fn kv() -> Self {
        Self::open(StoreKind::Kv)
    }

    /// Opens an empty store of `config.store`. `config.path` is ignored.
    pub fn with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dir = temp_dir.path().join("store");
        let store = open_store(&dir, &config, NoopLogger::shared()).expect("Failed to open store");

        Self {
            store,
            config,
            dir,
            _temp_dir: temp_dir,
        }
    }

    /// The backend kind.
    pub fn kind(&self) -> StoreKind {
        self.config.store
    }

    /// The store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Closes the store and opens it again from the same directory.
    pub fn reopen(&mut self) {
        self.store.close().expect("Failed to close store");
        self.store =
            open_store(&self.dir, &self.config, NoopLogger::shared()).expect("Failed to reopen store");
    }
}

impl std::ops::Deref for TestStore {
    type Target = dyn LogStore;

    fn deref(&self) -> &Self::Target {
        self.store.as_ref()
    }
}

/// Runs a test with an empty temporary store.
///
/// # Example
///
/// ```rust,ignore
/// use rpl_testkit::with_store;
///
/// #[test]
/// fn my_test() {
///     with_store(StoreKind::Kv, |store| {
///         assert_eq!(store.first_id().unwrap(), 0);
///     });
/// }
/// ```
pub fn with_store<F, R>(kind: StoreKind, f: F) -> R
where
    F: FnOnce(&dyn LogStore) -> R,
{
    let test_store = TestStore::open(kind);
    f(test_store.store.as_ref())
}

/// A replication driver in a temporary directory.
pub struct TestReplication {
    /// The driver instance.
    pub rpl: Replication,
    config: Config,
    _temp_dir: TempDir,
}

impl TestReplication {
    /// Opens a driver on `kind` without compression or expiry purging.
    pub fn open(kind: StoreKind) -> Self {
        Self::with_config(|config| config.store(kind))
    }

    /// Opens a driver with a customised configuration.
    ///
    /// The closure receives a config whose path is already the temporary
    /// directory, with compression and expiry purging switched off.
    pub fn with_config(customize: impl FnOnce(Config) -> Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = customize(
            Config::new(temp_dir.path().join("rpl"))
                .compression(false)
                .expired_log_days(0),
        );
        let rpl = Replication::open_with_logger(config.clone(), NoopLogger::shared())
            .expect("Failed to open replication");

        Self {
            rpl,
            config,
            _temp_dir: temp_dir,
        }
    }

    /// Closes the driver and opens it again from the same directory.
    pub fn reopen(&mut self) {
        self.rpl.close().expect("Failed to close replication");
        self.rpl = Replication::open_with_logger(self.config.clone(), NoopLogger::shared())
            .expect("Failed to reopen replication");
    }
}

impl std::ops::Deref for TestReplication {
    type Target = Replication;

    fn deref(&self) -> &Self::Target {
        &self.rpl
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// A store holding `count` records with IDs `1..=count`.
    pub fn populated_store(kind: StoreKind, count: u64) -> TestStore {
        let test_store = TestStore::open(kind);
        if count > 0 {
            test_store
                .store_logs(&sample_logs(1..=count))
                .expect("Failed to store logs");
        }
        test_store
    }

    /// A file store with `tables * per_table` records, sealing a table after
    /// about every `per_table` records.
    pub fn segmented_store(tables: u64, per_table: u64) -> TestStore {
        let record_size = sample_log(1).size() as u64;
        let test_store = TestStore::with_config(
            Config::default().max_log_file_size(record_size * per_table),
        );
        let count = tables * per_table;
        for log in sample_logs(1..=count) {
            test_store.store_log(&log).expect("Failed to store log");
        }
        test_store
    }
}
