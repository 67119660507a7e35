//! The log store contract shared by every backend.

use crate::config::{Config, StoreKind};
use crate::error::{RplError, RplResult};
use crate::file::FileStore;
use crate::kv::KvStore;
use crate::logger::Logger;
use crate::record::{unix_now, Log, INVALID_LOG_ID};
use std::path::Path;
use std::sync::Arc;

/// A durable, strictly ordered sequence of [`Log`] records keyed by ID.
///
/// # Invariants
///
/// - Stored IDs are non-zero and strictly increasing
/// - `store_logs` is all-or-nothing: a batch that is not strictly increasing,
///   or does not start above `last_id`, fails with [`RplError::LessLogId`]
///   and writes nothing
/// - `first_id`/`last_id` return 0 for an empty store
/// - After `close`, every call except `close` returns [`RplError::Closed`]
///
/// # Implementors
///
/// - [`crate::FileStore`] - Segmented table files
/// - [`crate::KvStore`] - Embedded ordered KV engine
pub trait LogStore: Send + Sync {
    /// Returns the record with exactly `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RplError::LogNotFound`] if no such record exists.
    fn get_log(&self, id: u64) -> RplResult<Log>;

    /// Returns the record with the smallest ID that is `>= id`.
    ///
    /// # Errors
    ///
    /// Returns [`RplError::LogNotFound`] if every stored ID is below `id`.
    fn seek_log(&self, id: u64) -> RplResult<Log>;

    /// Oldest stored ID, or 0 when empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn first_id(&self) -> RplResult<u64>;

    /// Newest stored ID, or 0 when empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn last_id(&self) -> RplResult<u64>;

    /// Appends one record.
    ///
    /// # Errors
    ///
    /// Same as [`LogStore::store_logs`].
    fn store_log(&self, log: &Log) -> RplResult<()> {
        self.store_logs(std::slice::from_ref(log))
    }

    /// Appends a batch of records atomically.
    ///
    /// # Errors
    ///
    /// Returns [`RplError::LessLogId`] for an out-of-order batch,
    /// [`RplError::InvalidLogId`] for ID 0, or a backend error.
    fn store_logs(&self, logs: &[Log]) -> RplResult<()>;

    /// Deletes the `n` oldest records.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be modified.
    fn purge(&self, n: u64) -> RplResult<()>;

    /// Deletes every record created more than `seconds` ago.
    ///
    /// # Errors
    ///
    /// Returns [`RplError::InvalidArgument`] if `seconds <= 0`.
    fn purge_expired(&self, seconds: i64) -> RplResult<()> {
        if seconds <= 0 {
            return Err(RplError::invalid_argument(format!(
                "invalid expired time {seconds}"
            )));
        }

        let cutoff = i64::from(unix_now()) - seconds;
        if cutoff < 0 {
            return Ok(());
        }
        // cutoff <= unix_now() <= u32::MAX
        self.purge_created_before(cutoff as u32)
    }

    /// Deletes records from the front while their `create_time <= cutoff`.
    ///
    /// Records are time-ordered by insertion, so deletion stops at the first
    /// record that is newer than `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be modified.
    fn purge_created_before(&self, cutoff: u32) -> RplResult<()>;

    /// Forces appended records to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&self) -> RplResult<()>;

    /// Deletes everything and returns to the freshly created state.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be modified.
    fn clear(&self) -> RplResult<()>;

    /// Releases all resources. Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns an error if final flushing fails.
    fn close(&self) -> RplResult<()>;
}

/// Validates that `logs` may be appended after `last`.
///
/// Returns the ID of the final record in the batch.
///
/// # Errors
///
/// Returns [`RplError::InvalidLogId`] or [`RplError::LessLogId`].
pub fn check_logs_order(logs: &[Log], last: u64) -> RplResult<u64> {
    let mut last = last;
    for log in logs {
        if log.id == INVALID_LOG_ID {
            return Err(RplError::InvalidLogId);
        }
        if log.id <= last {
            return Err(RplError::LessLogId { id: log.id, last });
        }
        last = log.id;
    }
    Ok(last)
}

/// Opens the backend selected by `config.store` under `dir`.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or fails load validation.
pub fn open_store(
    dir: &Path,
    config: &Config,
    logger: Arc<dyn Logger>,
) -> RplResult<Arc<dyn LogStore>> {
    let store: Arc<dyn LogStore> = match config.store {
        StoreKind::File => Arc::new(FileStore::open(dir, config, logger)?),
        StoreKind::Kv => Arc::new(KvStore::open(dir, config, logger)?),
    };
    Ok(store)
}
