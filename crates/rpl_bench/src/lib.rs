//! Shared helpers for the replication log benchmarks.

pub mod utils;
