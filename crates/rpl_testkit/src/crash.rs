//! Crash recovery testing for the segmented file store.
//!
//! A clean shutdown seals the active table. These utilities rewrite the
//! newest table on disk the way an unclean shutdown would have left it,
//! then reopen the store and check that every complete record survived.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rpl_testkit::crash::{CrashPoint, CrashRecoveryHarness};
//!
//! let mut harness = CrashRecoveryHarness::new();
//! let result = harness.run(CrashPoint::MidRecord, 10);
//! assert!(result.passed, "{:?}", result.error);
//! ```

use crate::fixtures::{sample_log, sample_logs};
use rpl_core::{open_store, Config, LogStore, NoopLogger, RplError, RplResult};
use rpl_storage::{FileBackend, StorageBackend};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Points at which a crash can be simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// All records written, seal never started.
    BeforeSeal,
    /// Seal started: the trailer is torn.
    DuringSeal,
    /// The next record was half written.
    MidRecord,
    /// Only part of the next record's head was written.
    MidHead,
}

impl CrashPoint {
    /// Every crash point.
    pub const ALL: [CrashPoint; 4] = [
        CrashPoint::BeforeSeal,
        CrashPoint::DuringSeal,
        CrashPoint::MidRecord,
        CrashPoint::MidHead,
    ];
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// What was simulated.
    pub point: CrashPoint,
    /// Records written before the crash.
    pub expected_records: u64,
    /// Records readable after recovery.
    pub recovered_records: u64,
    /// Any error message.
    pub error: Option<String>,
}

/// Segment table files in `dir`, oldest first.
pub fn table_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut tables: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "ldb"))
        .collect();
    tables.sort();
    Ok(tables)
}

/// Cuts `path` back to `records_end`, removing split record, index and trailer.
pub fn strip_seal(path: &Path, records_end: u64) -> RplResult<()> {
    let mut backend = FileBackend::open_existing(path)?;
    backend.truncate(records_end)?;
    backend.sync()?;
    Ok(())
}

/// Removes the last `bytes` bytes of `path`.
pub fn tear_tail(path: &Path, bytes: u64) -> RplResult<()> {
    let mut backend = FileBackend::open_existing(path)?;
    let size = backend.size()?;
    backend.truncate(size.saturating_sub(bytes))?;
    backend.sync()?;
    Ok(())
}

/// Appends raw bytes to `path`.
pub fn append_raw(path: &Path, bytes: &[u8]) -> RplResult<()> {
    let mut backend = FileBackend::open_existing(path)?;
    backend.append(bytes)?;
    backend.sync()?;
    Ok(())
}

/// Test harness for crash recovery scenarios.
pub struct CrashRecoveryHarness {
    temp_dir: TempDir,
    /// Results of the runs so far.
    pub results: Vec<CrashRecoveryResult>,
}

impl CrashRecoveryHarness {
    /// Creates a harness with its own temporary directory.
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
            results: Vec::new(),
        }
    }

    fn store_dir(&self, point: CrashPoint) -> PathBuf {
        self.temp_dir.path().join(format!("{point:?}"))
    }

    /// Writes `records` records, simulates a crash at `point`, and recovers.
    pub fn run(&mut self, point: CrashPoint, records: u64) -> CrashRecoveryResult {
        let result = match self.try_run(point, records) {
            Ok(recovered) if recovered == records => CrashRecoveryResult {
                passed: true,
                point,
                expected_records: records,
                recovered_records: recovered,
                error: None,
            },
            Ok(recovered) => CrashRecoveryResult {
                passed: false,
                point,
                expected_records: records,
                recovered_records: recovered,
                error: Some("records were lost".to_string()),
            },
            Err(err) => CrashRecoveryResult {
                passed: false,
                point,
                expected_records: records,
                recovered_records: 0,
                error: Some(err.to_string()),
            },
        };

        self.results.push(result.clone());
        result
    }

    fn try_run(&self, point: CrashPoint, records: u64) -> RplResult<u64> {
        let dir = self.store_dir(point);
        let config = Config::default();
        let logs = sample_logs(1..=records);

        {
            let store = open_store(&dir, &config, NoopLogger::shared())?;
            store.store_logs(&logs)?;
            store.close()?;
        }

        let table = table_files(&dir)?
            .pop()
            .ok_or_else(|| RplError::corrupted("no table written"))?;
        let records_end: u64 = logs.iter().map(|log| log.size() as u64).sum();
        let next = sample_log(records + 1).marshal()?;

        match point {
            CrashPoint::BeforeSeal => strip_seal(&table, records_end)?,
            CrashPoint::DuringSeal => tear_tail(&table, 10)?,
            CrashPoint::MidRecord => {
                strip_seal(&table, records_end)?;
                append_raw(&table, &next[..next.len() - 2])?;
            }
            CrashPoint::MidHead => {
                strip_seal(&table, records_end)?;
                append_raw(&table, &next[..9])?;
            }
        }

        let store = open_store(&dir, &config, NoopLogger::shared())?;
        let recovered = count_readable(store.as_ref(), records)?;

        // the recovered store keeps accepting appends
        store.store_log(&sample_log(records + 1))?;
        store.close()?;
        Ok(recovered)
    }

    /// Runs every crash point and returns whether all passed.
    pub fn run_all(&mut self, records: u64) -> bool {
        CrashPoint::ALL
            .into_iter()
            .map(|point| self.run(point, records).passed)
            .fold(true, |all, passed| all && passed)
    }
}

impl Default for CrashRecoveryHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn count_readable(store: &dyn LogStore, records: u64) -> RplResult<u64> {
    if store.first_id()? != 1 || store.last_id()? != records {
        return Ok(0);
    }
    let mut found = 0;
    for id in 1..=records {
        if store.get_log(id)? == sample_log(id) {
            found += 1;
        }
    }
    Ok(found)
}
