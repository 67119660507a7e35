//! Property-based test generators using proptest.
//!
//! Provides strategies for generating log records, ordered batches and
//! store operation sequences.

use proptest::prelude::*;
use rpl_core::{Log, COMPRESSION_NONE, COMPRESSION_SNAPPY};

/// Strategy for generating record payloads, including empty ones.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..1024)
}

/// Strategy for generating a single storable record (ID never 0).
pub fn log_strategy() -> impl Strategy<Value = Log> {
    (
        1u64..=u64::MAX,
        any::<u32>(),
        prop_oneof![Just(COMPRESSION_NONE), Just(COMPRESSION_SNAPPY)],
        payload_strategy(),
    )
        .prop_map(|(id, create_time, compression, data)| Log {
            id,
            create_time,
            compression,
            data,
        })
}

/// Strategy for generating a strictly increasing batch that may follow `last`.
///
/// IDs usually step by one and sometimes skip ahead, like a follower
/// receiving records after a commit cursor jump.
pub fn log_batch_strategy(last: u64, max_len: usize) -> impl Strategy<Value = Vec<Log>> {
    prop::collection::vec(
        (prop_oneof![8 => Just(1u64), 1 => 2u64..10], payload_strategy()),
        1..=max_len.max(1),
    )
    .prop_map(move |steps| {
        let mut id = last;
        steps
            .into_iter()
            .map(|(step, data)| {
                id += step;
                Log {
                    id,
                    create_time: 1_000_000u32.wrapping_add(id as u32),
                    compression: COMPRESSION_NONE,
                    data,
                }
            })
            .collect()
    })
}

/// An operation against a log store.
#[derive(Debug, Clone)]
pub enum StoreOperation {
    /// Append a batch starting `gap` IDs after the current last ID.
    Append {
        /// Distance from the last ID to the first new ID (at least 1).
        gap: u64,
        /// One payload per record.
        payloads: Vec<Vec<u8>>,
    },
    /// Purge the oldest records.
    Purge {
        /// Number of records.
        n: u64,
    },
    /// Point lookup.
    Get {
        /// Record ID.
        id: u64,
    },
    /// Lookup of the first record at or after an ID.
    Seek {
        /// Lower bound.
        id: u64,
    },
    /// Close and reopen the store.
    Reopen,
}

/// Strategy for generating store operations.
pub fn store_operation_strategy() -> impl Strategy<Value = StoreOperation> {
    prop_oneof![
        4 => (
            prop_oneof![6 => Just(1u64), 1 => 2u64..20],
            prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..8),
        )
            .prop_map(|(gap, payloads)| StoreOperation::Append { gap, payloads }),
        1 => (0u64..10).prop_map(|n| StoreOperation::Purge { n }),
        3 => (0u64..300).prop_map(|id| StoreOperation::Get { id }),
        2 => (0u64..300).prop_map(|id| StoreOperation::Seek { id }),
        1 => Just(StoreOperation::Reopen),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<StoreOperation>> {
    prop::collection::vec(store_operation_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for tests that touch the disk on every case.
    #[must_use]
    pub fn on_disk() -> Self {
        Self {
            cases: 16,
            max_shrink_iters: 50,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn log_id_is_never_reserved(log in log_strategy()) {
            prop_assert_ne!(log.id, 0);
        }

        #[test]
        fn batch_is_strictly_increasing(batch in log_batch_strategy(10, 16)) {
            prop_assert!(batch[0].id > 10);
            for pair in batch.windows(2) {
                prop_assert!(pair[1].id > pair[0].id);
            }
        }

        #[test]
        fn append_gap_is_positive(op in store_operation_strategy()) {
            if let StoreOperation::Append { gap, payloads } = op {
                prop_assert!(gap >= 1);
                prop_assert!(!payloads.is_empty());
            }
        }
    }
}
