//! The backend-independent [`LogStore`] contract.
//!
//! Every check takes an empty store and panics on the first violation.
//! Both backends run the same checks (see `tests/contract.rs`).

use crate::fixtures::{log_at, sample_log, sample_logs, TestStore};
use crate::generators::StoreOperation;
use rpl_core::{Log, LogStore, RplError};
use std::collections::BTreeMap;

/// An empty store reports 0 for both ends and finds nothing.
pub fn check_empty_store(store: &dyn LogStore) {
    assert_eq!(store.first_id().unwrap(), 0);
    assert_eq!(store.last_id().unwrap(), 0);
    assert!(store.get_log(1).unwrap_err().is_not_found());
    assert!(store.seek_log(0).unwrap_err().is_not_found());
    store.purge(5).unwrap();
    store.store_logs(&[]).unwrap();
    assert_eq!(store.last_id().unwrap(), 0);
}

/// IDs must be strictly greater than the last stored ID.
pub fn check_monotonic_ids(store: &dyn LogStore) {
    store.store_logs(&sample_logs(1..=10)).unwrap();
    assert_eq!(store.last_id().unwrap(), 10);

    let err = store.store_log(&sample_log(10)).unwrap_err();
    assert!(matches!(err, RplError::LessLogId { id: 10, last: 10 }));
    assert!(store.store_log(&sample_log(5)).unwrap_err().is_less_log_id());

    store.store_log(&sample_log(11)).unwrap();
    assert_eq!(store.last_id().unwrap(), 11);
}

/// ID 0 is reserved.
pub fn check_reserved_id(store: &dyn LogStore) {
    assert!(matches!(
        store.store_log(&sample_log(0)),
        Err(RplError::InvalidLogId)
    ));
    assert_eq!(store.last_id().unwrap(), 0);
}

/// An out-of-order batch fails as a whole and leaves nothing behind.
pub fn check_batch_atomicity(store: &dyn LogStore) {
    store.store_logs(&sample_logs(1..=10)).unwrap();

    let batch = vec![sample_log(11), sample_log(12), sample_log(9)];
    assert!(store.store_logs(&batch).unwrap_err().is_less_log_id());
    assert_eq!(store.last_id().unwrap(), 10);
    assert!(store.get_log(11).unwrap_err().is_not_found());

    store.store_logs(&sample_logs(11..=12)).unwrap();
    assert_eq!(store.last_id().unwrap(), 12);
}

/// Point lookups are exact; seeks land on the next stored ID across gaps.
pub fn check_get_and_seek(store: &dyn LogStore) {
    store.store_logs(&sample_logs(1..=5)).unwrap();
    store.store_logs(&sample_logs(20..=22)).unwrap();

    for id in (1..=5).chain(20..=22) {
        assert_eq!(store.get_log(id).unwrap(), sample_log(id));
    }
    assert!(store.get_log(0).unwrap_err().is_not_found());
    assert!(store.get_log(6).unwrap_err().is_not_found());
    assert!(store.get_log(23).unwrap_err().is_not_found());

    assert_eq!(store.seek_log(0).unwrap().id, 1);
    assert_eq!(store.seek_log(3).unwrap().id, 3);
    assert_eq!(store.seek_log(6).unwrap().id, 20);
    assert_eq!(store.seek_log(22).unwrap().id, 22);
    assert!(store.seek_log(23).unwrap_err().is_not_found());

    assert_eq!(store.first_id().unwrap(), 1);
    assert_eq!(store.last_id().unwrap(), 22);
}

/// Empty and large payloads survive storage bit for bit.
pub fn check_payload_sizes(store: &dyn LogStore) {
    let empty = Log {
        id: 1,
        create_time: 7,
        compression: 0,
        data: Vec::new(),
    };
    let large = Log {
        id: 2,
        create_time: 8,
        compression: 1,
        data: (0..1024 * 1024).map(|i| (i % 251) as u8).collect(),
    };
    store.store_logs(&[empty.clone(), large.clone()]).unwrap();

    assert_eq!(store.get_log(1).unwrap(), empty);
    assert_eq!(store.get_log(2).unwrap(), large);
}

/// `purge(n)` removes exactly the `n` oldest records.
pub fn check_purge_count(store: &dyn LogStore) {
    store.store_logs(&sample_logs(1..=4)).unwrap();
    store.store_logs(&sample_logs(10..=13)).unwrap();

    store.purge(0).unwrap();
    assert_eq!(store.first_id().unwrap(), 1);

    store.purge(5).unwrap();
    assert_eq!(store.first_id().unwrap(), 11);
    assert_eq!(store.last_id().unwrap(), 13);
    assert!(store.get_log(10).unwrap_err().is_not_found());
    assert_eq!(store.seek_log(1).unwrap().id, 11);

    store.purge(100).unwrap();
    assert_eq!(store.first_id().unwrap(), 0);
    assert_eq!(store.last_id().unwrap(), 0);
}

/// Records created at or before the cutoff go; the first newer one stops the purge.
pub fn check_purge_created_before(store: &dyn LogStore) {
    let logs = vec![log_at(1, 100), log_at(2, 200), log_at(3, 300)];
    store.store_logs(&logs).unwrap();

    // "now" is 400 and the window is 150 seconds
    store.purge_created_before(400 - 150).unwrap();
    assert_eq!(store.first_id().unwrap(), 3);
    assert_eq!(store.get_log(3).unwrap(), logs[2]);
    assert!(store.get_log(2).unwrap_err().is_not_found());

    store.purge_created_before(299).unwrap();
    assert_eq!(store.first_id().unwrap(), 3);
}

/// `purge_expired` measures from the wall clock.
pub fn check_purge_expired(store: &dyn LogStore) {
    let now = rpl_core::unix_now();
    let logs = vec![log_at(1, 100), log_at(2, now)];
    store.store_logs(&logs).unwrap();

    assert!(matches!(
        store.purge_expired(0),
        Err(RplError::InvalidArgument { .. })
    ));
    store.purge_expired(3600).unwrap();
    assert_eq!(store.first_id().unwrap(), 2);
    assert_eq!(store.last_id().unwrap(), 2);
}

/// `clear` returns the store to its initial state.
pub fn check_clear(store: &dyn LogStore) {
    store.store_logs(&sample_logs(1..=20)).unwrap();
    store.clear().unwrap();

    assert_eq!(store.first_id().unwrap(), 0);
    assert_eq!(store.last_id().unwrap(), 0);
    assert!(store.get_log(1).unwrap_err().is_not_found());

    store.store_log(&sample_log(1)).unwrap();
    assert_eq!(store.get_log(1).unwrap(), sample_log(1));
}

/// `close` is idempotent and everything after it fails with `Closed`.
pub fn check_close(store: &dyn LogStore) {
    store.store_logs(&sample_logs(1..=3)).unwrap();
    store.sync().unwrap();

    store.close().unwrap();
    store.close().unwrap();
    assert!(matches!(store.get_log(1), Err(RplError::Closed)));
    assert!(matches!(store.seek_log(1), Err(RplError::Closed)));
    assert!(matches!(store.first_id(), Err(RplError::Closed)));
    assert!(matches!(store.store_log(&sample_log(4)), Err(RplError::Closed)));
    assert!(matches!(store.clear(), Err(RplError::Closed)));
}

/// Records survive a close and reopen.
pub fn check_reopen(test_store: &mut TestStore) {
    test_store.store_logs(&sample_logs(1..=5)).unwrap();
    test_store.store_logs(&sample_logs(8..=9)).unwrap();
    test_store.purge(1).unwrap();

    test_store.reopen();
    assert_eq!(test_store.first_id().unwrap(), 2);
    assert_eq!(test_store.last_id().unwrap(), 9);
    assert_eq!(test_store.seek_log(6).unwrap(), sample_log(8));

    test_store.store_log(&sample_log(10)).unwrap();
    assert!(test_store.store_log(&sample_log(10)).unwrap_err().is_less_log_id());
}

/// Reference model of a log store.
#[derive(Debug, Default)]
pub struct LogModel {
    logs: BTreeMap<u64, Log>,
}

impl LogModel {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last stored ID, or 0.
    pub fn last_id(&self) -> u64 {
        self.logs.keys().next_back().copied().unwrap_or(0)
    }

    /// First stored ID, or 0.
    pub fn first_id(&self) -> u64 {
        self.logs.keys().next().copied().unwrap_or(0)
    }

    /// Records an appended batch.
    pub fn append(&mut self, logs: &[Log]) {
        for log in logs {
            self.logs.insert(log.id, log.clone());
        }
    }

    /// Removes the `n` oldest records.
    pub fn purge(&mut self, n: u64) {
        for _ in 0..n {
            if self.logs.pop_first().is_none() {
                break;
            }
        }
    }

    /// Exact lookup.
    pub fn get(&self, id: u64) -> Option<&Log> {
        self.logs.get(&id)
    }

    /// First record at or after `id`.
    pub fn seek(&self, id: u64) -> Option<&Log> {
        self.logs.range(id.max(1)..).next().map(|(_, log)| log)
    }
}

/// Applies `ops` to `test_store` and to a [`LogModel`], comparing every answer.
pub fn check_against_model(test_store: &mut TestStore, ops: &[StoreOperation]) {
    let mut model = LogModel::new();

    for op in ops {
        match op {
            StoreOperation::Append { gap, payloads } => {
                let mut id = model.last_id() + gap - 1;
                let logs: Vec<Log> = payloads
                    .iter()
                    .map(|data| {
                        id += 1;
                        Log {
                            id,
                            create_time: 1_000_000,
                            compression: 0,
                            data: data.clone(),
                        }
                    })
                    .collect();
                test_store.store_logs(&logs).unwrap();
                model.append(&logs);
            }
            StoreOperation::Purge { n } => {
                test_store.purge(*n).unwrap();
                model.purge(*n);
            }
            StoreOperation::Get { id } => match model.get(*id) {
                Some(expected) => assert_eq!(&test_store.get_log(*id).unwrap(), expected),
                None => assert!(test_store.get_log(*id).unwrap_err().is_not_found()),
            },
            StoreOperation::Seek { id } => match model.seek(*id) {
                Some(expected) => assert_eq!(&test_store.seek_log(*id).unwrap(), expected),
                None => assert!(test_store.seek_log(*id).unwrap_err().is_not_found()),
            },
            StoreOperation::Reopen => test_store.reopen(),
        }

        assert_eq!(test_store.first_id().unwrap(), model.first_id(), "after {op:?}");
        assert_eq!(test_store.last_id().unwrap(), model.last_id(), "after {op:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_purge_and_seek() {
        let mut model = LogModel::new();
        model.append(&sample_logs(1..=3));
        model.append(&sample_logs(7..=8));

        assert_eq!(model.seek(4).map(|log| log.id), Some(7));
        model.purge(4);
        assert_eq!(model.first_id(), 8);
        model.purge(10);
        assert_eq!(model.last_id(), 0);
        assert!(model.seek(0).is_none());
    }
}
