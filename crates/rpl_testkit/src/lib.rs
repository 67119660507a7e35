//! # RPL Testkit
//!
//! Test utilities for the replication log.
//!
//! This crate provides:
//! - Temporary stores and replication drivers that clean up after themselves
//! - Property-based generators for log records and batches
//! - The backend-independent [`LogStore`](rpl_core::LogStore) contract checks
//! - Crash simulation for segment tables
//! - Stress helpers for concurrent appends and reads
//! - Byte vectors pinning the on-disk record format
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rpl_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_store() {
//!     with_store(StoreKind::File, |store| {
//!         store.store_logs(&sample_logs(1..=10)).unwrap();
//!         assert_eq!(store.last_id().unwrap(), 10);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod contract;
pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod stress;
pub mod vectors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::contract::*;
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
    pub use crate::vectors::*;
    pub use rpl_core::{Config, Log, LogStore, Replication, StoreKind};
}

pub use fixtures::*;
pub use generators::*;
