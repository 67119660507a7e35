//! Replication log configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Hard ceiling for one segment table.
///
/// Record positions inside a table are indexed with 32-bit offsets, so no
/// record may start at or beyond 4 GiB no matter what is configured.
pub const MAX_LOG_FILE_SIZE: u64 = u32::MAX as u64;

/// Default segment table size before rotation.
pub const DEFAULT_MAX_LOG_FILE_SIZE: u64 = 1024 * 1024 * 1024;

/// Which [`crate::LogStore`] backend the replication driver opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreKind {
    /// Segmented table files ([`crate::FileStore`]).
    #[default]
    File,
    /// Embedded ordered KV engine ([`crate::KvStore`]).
    Kv,
}

/// When appended records are forced to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Leave it to the OS.
    #[default]
    None,
    /// A background worker syncs once per second.
    EverySecond,
    /// Sync after every append batch.
    Always,
}

/// Configuration for the replication log.
#[derive(Debug, Clone)]
pub struct Config {
    /// Replication directory. The log store and the commit cursor live under it.
    pub path: PathBuf,

    /// Log store backend.
    pub store: StoreKind,

    /// Whether the driver snappy-compresses payloads before storing them.
    pub compression: bool,

    /// Segment table size that triggers rotation (clamped to [`MAX_LOG_FILE_SIZE`]).
    pub max_log_file_size: u64,

    /// Maximum sealed tables kept by rotation (0 = unlimited).
    pub max_log_file_num: usize,

    /// Records older than this many days are purged (0 = never).
    pub expired_log_days: u32,

    /// How often the driver checks for expired records.
    pub purge_interval: Duration,

    /// Sync policy for appended records.
    pub sync_log: SyncMode,

    /// Byte bound of the file store's read cache.
    pub cache_capacity: usize,

    /// Item bound of the file store's read cache.
    pub cache_max_num: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("rpl"),
            store: StoreKind::File,
            compression: true,
            max_log_file_size: DEFAULT_MAX_LOG_FILE_SIZE,
            max_log_file_num: 0,
            expired_log_days: 7,
            purge_interval: Duration::from_secs(60 * 60),
            sync_log: SyncMode::None,
            cache_capacity: 4 * 1024 * 1024, // 4 MB
            cache_max_num: 1024,
        }
    }
}

impl Config {
    /// Creates a configuration rooted at `path` with default values.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Sets the log store backend.
    #[must_use]
    pub const fn store(mut self, kind: StoreKind) -> Self {
        self.store = kind;
        self
    }

    /// Sets whether payloads are compressed.
    #[must_use]
    pub const fn compression(mut self, value: bool) -> Self {
        self.compression = value;
        self
    }

    /// Sets the segment rotation size.
    #[must_use]
    pub const fn max_log_file_size(mut self, size: u64) -> Self {
        self.max_log_file_size = size;
        self
    }

    /// Sets the maximum number of sealed tables.
    #[must_use]
    pub const fn max_log_file_num(mut self, num: usize) -> Self {
        self.max_log_file_num = num;
        self
    }

    /// Sets the expiry window in days.
    #[must_use]
    pub const fn expired_log_days(mut self, days: u32) -> Self {
        self.expired_log_days = days;
        self
    }

    /// Sets the expiry check interval.
    #[must_use]
    pub const fn purge_interval(mut self, interval: Duration) -> Self {
        self.purge_interval = interval;
        self
    }

    /// Sets the sync policy.
    #[must_use]
    pub const fn sync_log(mut self, mode: SyncMode) -> Self {
        self.sync_log = mode;
        self
    }

    /// Sets the read cache bounds.
    #[must_use]
    pub const fn cache(mut self, capacity: usize, max_num: usize) -> Self {
        self.cache_capacity = capacity;
        self.cache_max_num = max_num;
        self
    }

    /// Rotation size actually used by the file store.
    ///
    /// Zero falls back to the default; anything above [`MAX_LOG_FILE_SIZE`] is capped.
    #[must_use]
    pub fn effective_max_log_file_size(&self) -> u64 {
        match self.max_log_file_size {
            0 => DEFAULT_MAX_LOG_FILE_SIZE,
            size => size.min(MAX_LOG_FILE_SIZE),
        }
    }

    /// Expiry window in seconds, or `None` when expiry is disabled.
    #[must_use]
    pub fn expired_log_seconds(&self) -> Option<i64> {
        match self.expired_log_days {
            0 => None,
            days => Some(i64::from(days) * 24 * 3600),
        }
    }
}
