//! [`LogStore`] over an embedded ordered KV engine.
//!
//! Each record is one entry in the `logs` partition of a fjall keyspace.
//! Keys are the 8-byte big-endian ID, so the engine's key order is the ID
//! order and seeks are range scans.

use crate::config::{Config, SyncMode};
use crate::error::{RplError, RplResult};
use crate::logger::Logger;
use crate::record::{Log, LogHead};
use crate::store::{check_logs_order, LogStore};
use crate::worker::Worker;
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const PARTITION: &str = "logs";
const TICK: Duration = Duration::from_secs(1);

/// Keys removed per committed batch, so purging a large store stays bounded.
const REMOVE_CHUNK: usize = 4096;

/// Log store backed by fjall.
pub struct KvStore {
    inner: Arc<KvInner>,
    worker: Mutex<Option<Worker>>,
}

struct KvInner {
    path: PathBuf,
    sync_mode: SyncMode,
    logger: Arc<dyn Logger>,
    /// `None` once closed.
    db: RwLock<Option<KvDb>>,
}

struct KvDb {
    keyspace: Keyspace,
    logs: PartitionHandle,
    bounds: Mutex<IdBounds>,
}

/// First and last stored IDs as last looked up; `None` means unknown.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct IdBounds {
    first: Option<u64>,
    last: Option<u64>,
}

fn encode_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn decode_key(key: &[u8]) -> RplResult<u64> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| RplError::corrupted(format!("log key has {} bytes", key.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

impl KvStore {
    /// Opens (or creates) the keyspace in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot open the directory.
    pub fn open(dir: &Path, config: &Config, logger: Arc<dyn Logger>) -> RplResult<Self> {
        let keyspace = fjall::Config::new(dir).open()?;
        let logs = keyspace.open_partition(PARTITION, PartitionCreateOptions::default())?;

        logger.info(format_args!("opened kv log store {}", dir.display()));

        let inner = Arc::new(KvInner {
            path: dir.to_path_buf(),
            sync_mode: config.sync_log,
            logger,
            db: RwLock::new(Some(KvDb {
                keyspace,
                logs,
                bounds: Mutex::new(IdBounds::default()),
            })),
        });

        let worker = if config.sync_log == SyncMode::EverySecond {
            let inner = Arc::clone(&inner);
            Some(Worker::spawn("rpl-kv-store", TICK, move || inner.tick())?)
        } else {
            None
        };

        Ok(Self {
            inner,
            worker: Mutex::new(worker),
        })
    }

    /// Directory holding the keyspace.
    pub fn dir(&self) -> &Path {
        &self.inner.path
    }
}

impl KvDb {
    fn first_id(&self) -> RplResult<u64> {
        let mut bounds = self.bounds.lock();
        if let Some(id) = bounds.first {
            return Ok(id);
        }
        let id = match self.logs.first_key_value()? {
            Some((key, _)) => decode_key(&key)?,
            None => 0,
        };
        bounds.first = Some(id);
        Ok(id)
    }

    fn last_id(&self) -> RplResult<u64> {
        let mut bounds = self.bounds.lock();
        if let Some(id) = bounds.last {
            return Ok(id);
        }
        let id = match self.logs.last_key_value()? {
            Some((key, _)) => decode_key(&key)?,
            None => 0,
        };
        bounds.last = Some(id);
        Ok(id)
    }

    fn forget_bounds(&self) {
        *self.bounds.lock() = IdBounds::default();
    }

    fn persist(&self) -> RplResult<()> {
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    /// Removes every key yielded before `stop` returns true.
    ///
    /// Keys go in chunks of [`REMOVE_CHUNK`]; a failure part way through
    /// still only ever removes a prefix of the log.
    fn remove_front(
        &self,
        mut stop: impl FnMut(u64, &[u8]) -> RplResult<bool>,
    ) -> RplResult<Option<u64>> {
        self.forget_bounds();

        let mut batch = self.keyspace.batch();
        let mut pending = 0;
        let mut through = None;

        for item in self.logs.iter() {
            let (key, value) = item?;
            let id = decode_key(&key)?;
            if stop(id, &value)? {
                break;
            }
            batch.remove(&self.logs, key);
            through = Some(id);

            pending += 1;
            if pending == REMOVE_CHUNK {
                batch.commit()?;
                batch = self.keyspace.batch();
                pending = 0;
            }
        }

        if pending > 0 {
            batch.commit()?;
        }
        Ok(through)
    }
}

impl KvInner {
    fn tick(&self) {
        let db = self.db.read();
        if let Some(db) = db.as_ref() {
            if let Err(err) = db.persist() {
                self.logger.error(format_args!("sync kv log store failed: {err}"));
            }
        }
    }

    fn read<T>(&self, f: impl FnOnce(&KvDb) -> RplResult<T>) -> RplResult<T> {
        let db = self.db.read();
        f(db.as_ref().ok_or(RplError::Closed)?)
    }

    fn write<T>(&self, f: impl FnOnce(&KvDb) -> RplResult<T>) -> RplResult<T> {
        let db = self.db.write();
        f(db.as_ref().ok_or(RplError::Closed)?)
    }
}

impl LogStore for KvStore {
    fn get_log(&self, id: u64) -> RplResult<Log> {
        self.inner.read(|db| match db.logs.get(encode_key(id))? {
            Some(value) => Log::unmarshal(&value),
            None => Err(RplError::LogNotFound),
        })
    }

    fn seek_log(&self, id: u64) -> RplResult<Log> {
        self.inner.read(|db| {
            match db.logs.range(encode_key(id.max(1))..).next() {
                Some(item) => {
                    let (_, value) = item?;
                    Log::unmarshal(&value)
                }
                None => Err(RplError::LogNotFound),
            }
        })
    }

    fn first_id(&self) -> RplResult<u64> {
        self.inner.read(KvDb::first_id)
    }

    fn last_id(&self) -> RplResult<u64> {
        self.inner.read(KvDb::last_id)
    }

    fn store_logs(&self, logs: &[Log]) -> RplResult<()> {
        if logs.is_empty() {
            return Ok(());
        }

        self.inner.write(|db| {
            let last = check_logs_order(logs, db.last_id()?)?;

            let mut batch = db.keyspace.batch();
            for log in logs {
                batch.insert(&db.logs, encode_key(log.id).to_vec(), log.marshal()?);
            }
            if let Err(err) = batch.commit() {
                db.forget_bounds();
                return Err(err.into());
            }

            {
                let mut bounds = db.bounds.lock();
                bounds.last = Some(last);
                if bounds.first == Some(0) {
                    bounds.first = Some(logs[0].id);
                }
            }

            if self.inner.sync_mode == SyncMode::Always {
                db.persist()?;
            }
            Ok(())
        })
    }

    fn purge(&self, n: u64) -> RplResult<()> {
        if n == 0 {
            return Ok(());
        }

        self.inner.write(|db| {
            let mut left = n;
            let through = db.remove_front(|_, _| {
                if left == 0 {
                    return Ok(true);
                }
                left -= 1;
                Ok(false)
            })?;
            if let Some(id) = through {
                self.inner
                    .logger
                    .info(format_args!("purged logs through {id} in kv store"));
            }
            Ok(())
        })
    }

    fn purge_created_before(&self, cutoff: u32) -> RplResult<()> {
        self.inner.write(|db| {
            let through =
                db.remove_front(|_, value| Ok(LogHead::parse(value)?.create_time > cutoff))?;
            if let Some(id) = through {
                self.inner.logger.info(format_args!(
                    "purged logs through {id} created at or before {cutoff}"
                ));
            }
            Ok(())
        })
    }

    fn sync(&self) -> RplResult<()> {
        self.inner.read(KvDb::persist)
    }

    fn clear(&self) -> RplResult<()> {
        self.inner.write(|db| {
            db.remove_front(|_, _| Ok(false))?;
            db.persist()?;
            self.inner.logger.info(format_args!(
                "cleared kv log store {}",
                self.inner.path.display()
            ));
            Ok(())
        })
    }

    fn close(&self) -> RplResult<()> {
        if let Some(mut worker) = self.worker.lock().take() {
            worker.stop();
        }

        let Some(db) = self.inner.db.write().take() else {
            return Ok(());
        };
        db.persist()?;
        self.inner.logger.info(format_args!(
            "closed kv log store {}",
            self.inner.path.display()
        ));
        Ok(())
    }
}

impl Drop for KvStore {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            self.inner
                .logger
                .error(format_args!("close kv log store failed: {err}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::NoopLogger;
    use tempfile::tempdir;

    fn bounds(store: &KvStore) -> IdBounds {
        let db = store.inner.db.read();
        db.as_ref().map(|db| *db.bounds.lock()).unwrap()
    }

    fn open(dir: &Path) -> KvStore {
        KvStore::open(dir, &Config::default(), NoopLogger::shared()).unwrap()
    }

    fn log(id: u64, create_time: u32) -> Log {
        Log {
            id,
            create_time,
            compression: 0,
            data: id.to_le_bytes().to_vec(),
        }
    }

    #[test]
    fn keys_sort_by_id() {
        assert!(encode_key(9) < encode_key(10));
        assert!(encode_key(255) < encode_key(256));
        assert_eq!(decode_key(&encode_key(77)).unwrap(), 77);
        assert!(decode_key(b"short").is_err());
    }

    #[test]
    fn store_get_and_seek() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        assert_eq!(store.first_id().unwrap(), 0);

        store
            .store_logs(&[log(1, 10), log(2, 10), log(7, 11)])
            .unwrap();
        assert_eq!(store.first_id().unwrap(), 1);
        assert_eq!(store.last_id().unwrap(), 7);
        assert_eq!(store.get_log(2).unwrap(), log(2, 10));
        assert!(store.get_log(3).unwrap_err().is_not_found());
        assert_eq!(store.seek_log(3).unwrap().id, 7);
        assert!(store.seek_log(8).unwrap_err().is_not_found());

        assert!(store.store_log(&log(7, 12)).unwrap_err().is_less_log_id());
        assert_eq!(store.last_id().unwrap(), 7);
    }

    #[test]
    fn purge_and_purge_created_before() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        store
            .store_logs(&[log(1, 100), log(2, 200), log(3, 300), log(4, 400)])
            .unwrap();

        store.purge(1).unwrap();
        assert_eq!(store.first_id().unwrap(), 2);

        store.purge_created_before(250).unwrap();
        assert_eq!(store.first_id().unwrap(), 3);
        assert_eq!(store.last_id().unwrap(), 4);

        store.purge(10).unwrap();
        assert_eq!(store.first_id().unwrap(), 0);
        assert_eq!(store.last_id().unwrap(), 0);
    }

    #[test]
    fn id_bounds_are_cached_until_changed() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        assert_eq!(store.first_id().unwrap(), 0);
        assert_eq!(bounds(&store).first, Some(0));

        store.store_logs(&[log(3, 1), log(4, 1), log(5, 1)]).unwrap();
        assert_eq!(
            bounds(&store),
            IdBounds {
                first: Some(3),
                last: Some(5)
            }
        );
        assert_eq!(store.first_id().unwrap(), 3);

        store.purge(2).unwrap();
        assert_eq!(bounds(&store), IdBounds::default());
        assert_eq!(store.first_id().unwrap(), 5);
        assert_eq!(store.last_id().unwrap(), 5);

        store.clear().unwrap();
        assert_eq!(bounds(&store), IdBounds::default());
        assert_eq!(store.first_id().unwrap(), 0);
        assert_eq!(store.last_id().unwrap(), 0);
    }

    #[test]
    fn purge_spans_several_chunks() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let total = REMOVE_CHUNK as u64 * 2 + 10;
        let batch: Vec<Log> = (1..=total).map(|id| log(id, 1)).collect();
        store.store_logs(&batch).unwrap();

        store.purge(REMOVE_CHUNK as u64 + 5).unwrap();
        assert_eq!(store.first_id().unwrap(), REMOVE_CHUNK as u64 + 6);

        store.clear().unwrap();
        assert_eq!(store.first_id().unwrap(), 0);
        assert!(store.seek_log(1).unwrap_err().is_not_found());
    }

    #[test]
    fn reopen_and_clear() {
        let dir = tempdir().unwrap();
        {
            let store = open(dir.path());
            store.store_logs(&[log(5, 1), log(6, 1)]).unwrap();
            store.close().unwrap();
        }

        let store = open(dir.path());
        assert_eq!(store.first_id().unwrap(), 5);
        assert_eq!(store.get_log(6).unwrap(), log(6, 1));

        store.clear().unwrap();
        assert_eq!(store.last_id().unwrap(), 0);
        store.store_log(&log(1, 1)).unwrap();
        assert_eq!(store.first_id().unwrap(), 1);
    }

    #[test]
    fn close_is_idempotent_and_final() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        store.close().unwrap();
        store.close().unwrap();
        assert!(matches!(store.get_log(1), Err(RplError::Closed)));
        assert!(matches!(store.store_log(&log(1, 1)), Err(RplError::Closed)));
    }
}
