//! Error types for the replication log.

use std::io;
use thiserror::Error;

/// Result type for log store and replication operations.
pub type RplResult<T> = Result<T, RplError>;

/// Errors that can occur in log stores and the replication driver.
#[derive(Debug, Error)]
pub enum RplError {
    /// The requested ID has no record (point lookup miss, or nothing at or after a seek target).
    #[error("log not found")]
    LogNotFound,

    /// An append carried an ID that is not strictly greater than the previous one.
    ///
    /// The whole batch is rejected and the store is unchanged.
    #[error("log id {id} is not greater than last id {last}")]
    LessLogId {
        /// The offending ID.
        id: u64,
        /// The ID it had to exceed (store last ID or the previous ID in the batch).
        last: u64,
    },

    /// No stored record is waiting to be committed.
    #[error("no behind commit log")]
    NoBehindLog,

    /// ID 0 is reserved and can never be stored.
    #[error("log id 0 is reserved")]
    InvalidLogId,

    /// Fewer bytes were available than a record header declared.
    #[error("short read: needed {needed} bytes")]
    ShortRead {
        /// Number of bytes the decoder needed.
        needed: usize,
    },

    /// On-disk state is inconsistent (bad segment trailer, overlapping tables, ...).
    #[error("log store corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// A caller-supplied argument is out of range.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// The store or driver was closed.
    #[error("log store is closed")]
    Closed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Byte-store backend error.
    #[error("storage error: {0}")]
    Storage(#[from] rpl_storage::StorageError),

    /// Embedded KV engine error.
    #[error("kv engine error: {0}")]
    Kv(#[from] fjall::Error),

    /// Payload compression or decompression failed.
    #[error("compression error: {0}")]
    Compression(#[from] snap::Error),
}

impl RplError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Returns true for [`RplError::LogNotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::LogNotFound)
    }

    /// Returns true for [`RplError::LessLogId`].
    #[must_use]
    pub fn is_less_log_id(&self) -> bool {
        matches!(self, Self::LessLogId { .. })
    }

    /// Returns true for [`RplError::NoBehindLog`].
    #[must_use]
    pub fn is_no_behind_log(&self) -> bool {
        matches!(self, Self::NoBehindLog)
    }
}
