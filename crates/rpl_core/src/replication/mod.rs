//! The replication driver.
//!
//! [`Replication`] owns one [`LogStore`] and the commit cursor. A master
//! appends with [`Replication::log`], which assigns the next ID; a follower
//! stores the master's records as-is with [`Replication::store_logs`]. The
//! consumer applies records in ID order and acknowledges them with
//! [`Replication::update_commit_id`].
//!
//! ```text
//! <path>/
//!   commit.log     8-byte commit cursor
//!   ldb/           FileStore tables (StoreKind::File)
//!   wal/           KvStore keyspace (StoreKind::Kv)
//! ```

mod commit;
mod notify;

pub use notify::LogWaiter;

use crate::config::{Config, StoreKind, SyncMode};
use crate::error::{RplError, RplResult};
use crate::logger::{Logger, TracingLogger};
use crate::record::{unix_now, Log, COMPRESSION_NONE, COMPRESSION_SNAPPY};
use crate::store::{open_store, LogStore};
use crate::worker::Worker;
use commit::{CommitLog, COMMIT_FILE};
use notify::Notifier;
use parking_lot::Mutex;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Snapshot of the driver's ID positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stat {
    /// Oldest stored ID (0 when empty).
    pub first_id: u64,
    /// Newest stored ID (0 when empty).
    pub last_id: u64,
    /// Newest acknowledged ID.
    pub commit_id: u64,
}

/// Replication log driver.
///
/// # Thread Safety
///
/// All methods take `&self`. ID assignment, commit updates and clears are
/// serialized by one mutex; waiters only touch the notifier.
///
/// # Example
///
/// ```rust,no_run
/// use rpl_core::{Config, Replication};
///
/// let rpl = Replication::open(Config::new("/var/lib/app/rpl"))?;
/// let log = rpl.log(b"SET k v")?;
///
/// let next = rpl.next_need_commit_log()?;
/// assert_eq!(next.id, log.id);
/// assert_eq!(next.uncompressed_data()?.as_ref(), b"SET k v");
/// rpl.update_commit_id(next.id)?;
/// assert!(!rpl.commit_id_behind()?);
/// # Ok::<(), rpl_core::RplError>(())
/// ```
pub struct Replication {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

struct Shared {
    config: Config,
    logger: Arc<dyn Logger>,
    /// `None` once closed.
    state: Mutex<Option<State>>,
    notifier: Arc<Notifier>,
}

struct State {
    store: Arc<dyn LogStore>,
    commit: CommitLog,
}

impl Shared {
    fn store(&self) -> RplResult<Arc<dyn LogStore>> {
        let state = self.state.lock();
        let state = state.as_ref().ok_or(RplError::Closed)?;
        Ok(Arc::clone(&state.store))
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> RplResult<T>) -> RplResult<T> {
        let mut state = self.state.lock();
        f(state.as_mut().ok_or(RplError::Closed)?)
    }

    fn purge_expired(&self, seconds: i64) {
        let Ok(store) = self.store() else {
            return;
        };
        match store.purge_expired(seconds) {
            Ok(()) | Err(RplError::Closed) => {}
            Err(err) => self
                .logger
                .error(format_args!("purge expired logs failed: {err}")),
        }
    }
}

impl Replication {
    /// Opens the driver, logging through `tracing`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or the commit file cannot be opened.
    pub fn open(config: Config) -> RplResult<Self> {
        Self::open_with_logger(config, TracingLogger::shared())
    }

    /// Opens the driver with an explicit logger.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or the commit file cannot be opened.
    pub fn open_with_logger(config: Config, logger: Arc<dyn Logger>) -> RplResult<Self> {
        fs::create_dir_all(&config.path)?;

        let store_dir = config.path.join(match config.store {
            StoreKind::File => "ldb",
            StoreKind::Kv => "wal",
        });
        let store = open_store(&store_dir, &config, Arc::clone(&logger))?;
        let commit = CommitLog::open(
            &config.path.join(COMMIT_FILE),
            config.sync_log == SyncMode::Always,
        )?;

        logger.info(format_args!(
            "opened replication {} (first {}, last {}, commit {})",
            config.path.display(),
            store.first_id()?,
            store.last_id()?,
            commit.id()
        ));

        let expired_seconds = config.expired_log_seconds();
        let purge_interval = config.purge_interval;
        let shared = Arc::new(Shared {
            config,
            logger,
            state: Mutex::new(Some(State { store, commit })),
            notifier: Notifier::new(),
        });

        let worker = match expired_seconds {
            Some(seconds) => {
                let shared = Arc::clone(&shared);
                Some(Worker::spawn("rpl-purge", purge_interval, move || {
                    shared.purge_expired(seconds);
                })?)
            }
            None => None,
        };

        Ok(Self {
            shared,
            worker: Mutex::new(worker),
        })
    }

    /// The configuration the driver was opened with.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// The replication directory.
    pub fn path(&self) -> &Path {
        &self.shared.config.path
    }

    /// Appends `data` as a new record and wakes all waiters.
    ///
    /// The ID is `max(last_id, commit_id) + 1`, so IDs acknowledged by a
    /// consumer are never reused even if the store lost them.
    ///
    /// # Errors
    ///
    /// Returns a store error, or [`RplError::Closed`].
    pub fn log(&self, data: &[u8]) -> RplResult<Log> {
        let (compression, data) = if self.shared.config.compression {
            (
                COMPRESSION_SNAPPY,
                snap::raw::Encoder::new().compress_vec(data)?,
            )
        } else {
            (COMPRESSION_NONE, data.to_vec())
        };

        self.shared.with_state(|state| {
            let id = state
                .store
                .last_id()?
                .max(state.commit.id())
                .checked_add(1)
                .ok_or_else(|| RplError::invalid_argument("log IDs are exhausted"))?;
            let log = Log {
                id,
                create_time: unix_now(),
                compression,
                data,
            };
            state.store.store_log(&log)?;
            self.shared.notifier.notify();
            Ok(log)
        })
    }

    /// Subscribes to the next append.
    ///
    /// The returned waiter is only woken by appends that happen after this
    /// call, never by ones that already finished.
    pub fn wait_log(&self) -> LogWaiter {
        self.shared.notifier.subscribe()
    }

    /// Stores a record that already carries its ID.
    ///
    /// # Errors
    ///
    /// Returns [`RplError::LessLogId`] if the ID does not follow the store.
    pub fn store_log(&self, log: &Log) -> RplResult<()> {
        self.store_logs(std::slice::from_ref(log))
    }

    /// Stores records that already carry their IDs, atomically.
    ///
    /// # Errors
    ///
    /// Returns [`RplError::LessLogId`] if the batch is out of order.
    pub fn store_logs(&self, logs: &[Log]) -> RplResult<()> {
        self.shared.with_state(|state| {
            state.store.store_logs(logs)?;
            if !logs.is_empty() {
                self.shared.notifier.notify();
            }
            Ok(())
        })
    }

    /// Returns the record with `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RplError::LogNotFound`] if it is not stored.
    pub fn get_log(&self, id: u64) -> RplResult<Log> {
        self.shared.store()?.get_log(id)
    }

    /// Oldest stored ID, or 0.
    ///
    /// # Errors
    ///
    /// Returns a store error, or [`RplError::Closed`].
    pub fn first_log_id(&self) -> RplResult<u64> {
        self.shared.store()?.first_id()
    }

    /// Newest stored ID, or 0.
    ///
    /// # Errors
    ///
    /// Returns a store error, or [`RplError::Closed`].
    pub fn last_log_id(&self) -> RplResult<u64> {
        self.shared.store()?.last_id()
    }

    /// Newest acknowledged ID.
    ///
    /// # Errors
    ///
    /// Returns [`RplError::Closed`] after close.
    pub fn last_commit_id(&self) -> RplResult<u64> {
        self.shared.with_state(|state| Ok(state.commit.id()))
    }

    /// Persists `id` as the commit cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit file cannot be written.
    pub fn update_commit_id(&self, id: u64) -> RplResult<()> {
        self.shared.with_state(|state| state.commit.update(id))
    }

    /// First, last and commit IDs read under one lock.
    ///
    /// # Errors
    ///
    /// Returns a store error, or [`RplError::Closed`].
    pub fn stat(&self) -> RplResult<Stat> {
        self.shared.with_state(|state| {
            Ok(Stat {
                first_id: state.store.first_id()?,
                last_id: state.store.last_id()?,
                commit_id: state.commit.id(),
            })
        })
    }

    /// Whether a stored record has not been committed yet.
    ///
    /// # Errors
    ///
    /// Returns a store error, or [`RplError::Closed`].
    pub fn commit_id_behind(&self) -> RplResult<bool> {
        self.shared
            .with_state(|state| Ok(state.store.last_id()? > state.commit.id()))
    }

    /// Returns the record right after the commit cursor.
    ///
    /// # Errors
    ///
    /// Returns [`RplError::NoBehindLog`] when everything is committed.
    pub fn next_need_commit_log(&self) -> RplResult<Log> {
        self.shared.with_state(|state| {
            let commit = state.commit.id();
            if state.store.last_id()? <= commit {
                return Err(RplError::NoBehindLog);
            }
            state.store.get_log(commit + 1)
        })
    }

    /// Deletes every record and resets the commit cursor to 0.
    ///
    /// # Errors
    ///
    /// Returns a store or commit file error.
    pub fn clear(&self) -> RplResult<()> {
        self.clear_with_commit_id(0)
    }

    /// Deletes every record and sets the commit cursor to `id`.
    ///
    /// # Errors
    ///
    /// Returns a store or commit file error.
    pub fn clear_with_commit_id(&self, id: u64) -> RplResult<()> {
        self.shared.with_state(|state| {
            state.store.clear()?;
            state.commit.update(id)?;
            self.shared.logger.info(format_args!(
                "cleared replication {}, commit id {id}",
                self.shared.config.path.display()
            ));
            Ok(())
        })
    }

    /// Forces stored records to disk.
    ///
    /// # Errors
    ///
    /// Returns a store error, or [`RplError::Closed`].
    pub fn sync(&self) -> RplResult<()> {
        self.shared.store()?.sync()
    }

    /// Stops the purge worker, then closes the store and the commit file.
    ///
    /// Waiters are released. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails to close cleanly.
    pub fn close(&self) -> RplResult<()> {
        if let Some(mut worker) = self.worker.lock().take() {
            worker.stop();
        }

        let Some(state) = self.shared.state.lock().take() else {
            return Ok(());
        };
        self.shared.notifier.close();
        state.store.close()?;

        self.shared.logger.info(format_args!(
            "closed replication {}",
            self.shared.config.path.display()
        ));
        Ok(())
    }
}

impl Drop for Replication {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            self.shared
                .logger
                .error(format_args!("close replication failed: {err}"));
        }
    }
}
