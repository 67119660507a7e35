//! Segmented file log store.
//!
//! Records are appended to one writable table (`{index:08}.ldb`). When the
//! table reaches the configured size, or the next ID does not follow the
//! previous one, it is sealed and becomes an immutable, indexed table.
//!
//! Sealed table layout:
//!
//! ```text
//! +-----------------+---------------+---------+--------------+----------------------------------+
//! | records ...     | split record  | padding | offset index | index_start | index_len | magic |
//! |                 | (ID 0)        | to 4096 | u32 BE each  | u64 BE      | u32 BE    | 20 B  |
//! +-----------------+---------------+---------+--------------+----------------------------------+
//! ```
//!
//! A table that lacks the trailer was not closed cleanly. It is truncated
//! after its last complete record and resealed when the store opens.

mod store;
mod table;

pub use store::FileStore;
