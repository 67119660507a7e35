//! # RPL Core
//!
//! Replication write-ahead log.
//!
//! This crate provides:
//! - The log record codec (17-byte big-endian head + payload)
//! - The [`LogStore`] contract with two backends: segmented table files
//!   ([`FileStore`]) and an embedded ordered KV engine ([`KvStore`])
//! - A byte- and count-bounded LRU cache of encoded records
//! - The [`Replication`] driver: ID assignment, commit cursor, append
//!   notifications and background expiry purging
//!
//! ## Key Invariants
//!
//! - Stored IDs are non-zero and strictly increasing
//! - Batches are all-or-nothing
//! - A newly assigned ID is always above both the last stored ID and the
//!   commit cursor
//! - A waiter is woken by every append after it subscribed, and by none
//!   before
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rpl_core::{Config, Replication, StoreKind};
//!
//! let rpl = Replication::open(Config::new("data/rpl").store(StoreKind::File))?;
//! let waiter = rpl.wait_log();
//! rpl.log(b"SET k v")?;
//! assert!(waiter.is_ready());
//! # Ok::<(), rpl_core::RplError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod error;
mod file;
mod kv;
mod logger;
mod record;
mod replication;
mod store;
mod worker;

pub use cache::LogLruCache;
pub use config::{Config, StoreKind, SyncMode, DEFAULT_MAX_LOG_FILE_SIZE, MAX_LOG_FILE_SIZE};
pub use error::{RplError, RplResult};
pub use file::FileStore;
pub use kv::KvStore;
pub use logger::{LogLevel, Logger, MemoryLogger, NoopLogger, TracingLogger};
pub use record::{
    unix_now, Log, LogHead, COMPRESSION_NONE, COMPRESSION_SNAPPY, INVALID_LOG_ID, LOG_HEAD_SIZE,
};
pub use replication::{LogWaiter, Replication, Stat};
pub use store::{check_logs_order, open_store, LogStore};
