//! # RPL Storage
//!
//! Byte-store backends underneath the replication log.
//!
//! Backends are **opaque byte stores**: they append, read at an offset,
//! flush, sync and truncate. They do not know what a log record, a
//! segment table or an offset index is; `rpl_core` owns all of that.
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - One OS file per backend, used for segment tables
//! - [`InMemoryBackend`] - Heap buffer, used for tests and table-format checks
//!
//! ## Example
//!
//! ```rust
//! use rpl_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(&7u64.to_be_bytes()).unwrap();
//! assert_eq!(backend.read_u64_at(offset).unwrap(), 7);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
