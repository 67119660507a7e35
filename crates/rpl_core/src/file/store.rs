//! The file-backed [`LogStore`].

use super::table::{parse_table_name, TableReader, TableWriter, TMP_SUFFIX};
use crate::cache::LogLruCache;
use crate::config::{Config, SyncMode, MAX_LOG_FILE_SIZE};
use crate::error::{RplError, RplResult};
use crate::logger::Logger;
use crate::record::{unix_now, Log};
use crate::store::{check_logs_order, LogStore};
use crate::worker::Worker;
use parking_lot::{Mutex, RwLock};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TICK: Duration = Duration::from_secs(1);

/// Sealed tables idle for longer than this release their file handle.
const READER_KEEPALIVE_SECS: u32 = 30;

/// Log store over a directory of segment tables.
///
/// # Concurrency
///
/// Readers run in parallel with each other. Appends, purges and rotation
/// take the writer lock first and the sealed-table lock second; nothing
/// takes them in the opposite order.
///
/// # Example
///
/// ```rust,no_run
/// use rpl_core::{Config, FileStore, Log, LogStore, TracingLogger};
/// use std::path::Path;
///
/// let config = Config::default();
/// let store = FileStore::open(Path::new("rpl/ldb"), &config, TracingLogger::shared())?;
/// store.store_log(&Log::new(1, b"SET k v".to_vec()))?;
/// assert_eq!(store.get_log(1)?.data, b"SET k v");
/// store.close()?;
/// # Ok::<(), rpl_core::RplError>(())
/// ```
pub struct FileStore {
    inner: Arc<FileStoreInner>,
    worker: Mutex<Option<Worker>>,
}

struct FileStoreInner {
    dir: PathBuf,
    max_file_num: usize,
    sync_mode: SyncMode,
    writer: RwLock<TableWriter>,
    readers: RwLock<Vec<TableReader>>,
    cache: Mutex<LogLruCache>,
    closed: AtomicBool,
    logger: Arc<dyn Logger>,
}

impl FileStore {
    /// Opens (or creates) the store in `dir`.
    ///
    /// Stale rewrite files are removed, unclean tables are repaired, and the
    /// sealed tables are validated before a fresh writable table is started
    /// after the highest existing index.
    ///
    /// # Errors
    ///
    /// Returns [`RplError::Corrupted`] if the sealed tables overlap or are out
    /// of order, or an I/O error.
    pub fn open(dir: &Path, config: &Config, logger: Arc<dyn Logger>) -> RplResult<Self> {
        fs::create_dir_all(dir)?;

        let mut indices = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.ends_with(TMP_SUFFIX) {
                logger.warn(format_args!("removing stale rewrite file {name}"));
                fs::remove_file(entry.path())?;
                continue;
            }
            if let Some(index) = parse_table_name(name) {
                indices.push(index);
            }
        }
        indices.sort_unstable();

        let mut readers = Vec::with_capacity(indices.len());
        for &index in &indices {
            if let Some(reader) = TableReader::open(dir, index, logger.as_ref())? {
                readers.push(reader);
            }
        }
        check_tables(&readers)?;

        let next_index = indices.last().map_or(1, |index| index + 1);
        let writer = TableWriter::new(dir, next_index, config.effective_max_log_file_size());

        logger.info(format_args!(
            "opened file log store {} with {} tables, next table {next_index}",
            dir.display(),
            readers.len()
        ));

        let inner = Arc::new(FileStoreInner {
            dir: dir.to_path_buf(),
            max_file_num: config.max_log_file_num,
            sync_mode: config.sync_log,
            writer: RwLock::new(writer),
            readers: RwLock::new(readers),
            cache: Mutex::new(LogLruCache::new(config.cache_capacity, config.cache_max_num)),
            closed: AtomicBool::new(false),
            logger,
        });

        let worker = {
            let inner = Arc::clone(&inner);
            Worker::spawn("rpl-file-store", TICK, move || inner.tick())?
        };

        Ok(Self {
            inner,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Directory holding the tables.
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Number of sealed tables.
    pub fn table_count(&self) -> usize {
        self.inner.readers.read().len()
    }

    /// Index the next appended record goes to.
    pub fn active_table_index(&self) -> u64 {
        self.inner.writer.read().index()
    }
}

/// Sealed tables must be ordered, non-empty and non-overlapping.
///
/// Gaps between tables are fine: they come from IDs that skipped ahead.
fn check_tables(readers: &[TableReader]) -> RplResult<()> {
    for reader in readers {
        if reader.first() == 0 || reader.first() > reader.last() {
            return Err(RplError::corrupted(format!(
                "table {} has invalid id range {}..={}",
                reader.index(),
                reader.first(),
                reader.last()
            )));
        }
    }
    for pair in readers.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.index() <= prev.index() || next.first() <= prev.last() {
            return Err(RplError::corrupted(format!(
                "table {} ({}..={}) overlaps table {} ({}..={})",
                next.index(),
                next.first(),
                next.last(),
                prev.index(),
                prev.first(),
                prev.last()
            )));
        }
    }
    Ok(())
}

/// Splits a batch at every ID gap. Each run fits a table's positional index.
fn contiguous_runs<'a>(logs: &[Log], encoded: &'a [Vec<u8>]) -> Vec<&'a [Vec<u8>]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for (i, pair) in logs.windows(2).enumerate() {
        if pair[1].id != pair[0].id + 1 {
            runs.push(&encoded[start..=i]);
            start = i + 1;
        }
    }
    runs.push(&encoded[start..]);
    runs
}

fn run_len(run: &[Vec<u8>]) -> u64 {
    run.iter().map(|bytes| bytes.len() as u64).sum()
}

fn last_id_of(writer: &TableWriter, readers: &[TableReader]) -> u64 {
    if !writer.is_empty() {
        return writer.last();
    }
    readers.last().map_or(0, TableReader::last)
}

impl FileStoreInner {
    fn ensure_open(&self) -> RplResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RplError::Closed);
        }
        Ok(())
    }

    fn tick(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        if self.sync_mode == SyncMode::EverySecond {
            if let Err(err) = self.writer.write().sync() {
                self.logger.error(format_args!("sync log table failed: {err}"));
            }
        }

        let now = unix_now();
        for reader in self.readers.read().iter() {
            if reader.close_if_idle(now, READER_KEEPALIVE_SECS) {
                self.logger
                    .debug(format_args!("closed idle table {}", reader.index()));
            }
        }
    }

    /// Decodes `bytes` and remembers them in the cache.
    fn cached(&self, id: u64, bytes: Vec<u8>) -> RplResult<Log> {
        let log = Log::unmarshal(&bytes)?;
        self.cache.lock().set(id, bytes);
        Ok(log)
    }

    fn from_cache(&self, id: u64) -> Option<RplResult<Log>> {
        let mut cache = self.cache.lock();
        cache.get(id).map(Log::unmarshal)
    }

    fn get_log(&self, id: u64) -> RplResult<Log> {
        if id == 0 {
            return Err(RplError::LogNotFound);
        }
        if let Some(log) = self.from_cache(id) {
            return log;
        }

        {
            let writer = self.writer.read();
            if writer.contains(id) {
                let bytes = writer.read_record(id)?;
                return self.cached(id, bytes);
            }
        }

        let readers = self.readers.read();
        let idx = readers.partition_point(|reader| reader.last() < id);
        match readers.get(idx) {
            Some(reader) if reader.contains(id) => {
                let bytes = reader.read_record(id)?;
                self.cached(id, bytes)
            }
            _ => Err(RplError::LogNotFound),
        }
    }

    fn seek_log(&self, id: u64) -> RplResult<Log> {
        let id = id.max(1);
        let writer = self.writer.read();
        let readers = self.readers.read();

        let idx = readers.partition_point(|reader| reader.last() < id);
        let (target, reader) = match readers.get(idx) {
            Some(reader) => (id.max(reader.first()), Some(reader)),
            None if !writer.is_empty() && writer.last() >= id => (id.max(writer.first()), None),
            None => return Err(RplError::LogNotFound),
        };

        if let Some(log) = self.from_cache(target) {
            return log;
        }
        let bytes = match reader {
            Some(reader) => reader.read_record(target)?,
            None => writer.read_record(target)?,
        };
        self.cached(target, bytes)
    }

    fn first_id(&self) -> u64 {
        let writer = self.writer.read();
        let readers = self.readers.read();
        match readers.first() {
            Some(reader) => reader.first(),
            None if !writer.is_empty() => writer.first(),
            None => 0,
        }
    }

    fn last_id(&self) -> u64 {
        let writer = self.writer.read();
        let readers = self.readers.read();
        last_id_of(&writer, &readers)
    }

    fn store_logs(&self, logs: &[Log]) -> RplResult<()> {
        if logs.is_empty() {
            return Ok(());
        }

        let mut writer = self.writer.write();
        self.ensure_open()?;

        let last = last_id_of(&writer, &self.readers.read());
        check_logs_order(logs, last)?;
        let encoded = logs
            .iter()
            .map(Log::marshal)
            .collect::<RplResult<Vec<_>>>()?;

        let runs = contiguous_runs(logs, &encoded);
        for run in &runs {
            let len = run_len(run);
            if len > MAX_LOG_FILE_SIZE {
                return Err(RplError::invalid_argument(format!(
                    "run of {len} bytes does not fit one table"
                )));
            }
        }

        // a run never spans tables, so the batch lands or fails as a whole
        match runs.as_slice() {
            [run] => {
                if writer.needs_rotation(logs[0].id, run_len(run)) {
                    self.rotate(&mut writer)?;
                }
                let sync = self.sync_mode == SyncMode::Always;
                writer.append_batch(run, sync, self.logger.as_ref())?;
            }
            _ => {
                self.rotate(&mut writer)?;
                self.store_runs(&mut writer, &runs)?;
            }
        }

        {
            let mut cache = self.cache.lock();
            for (log, bytes) in logs.iter().zip(encoded) {
                cache.set(log.id, bytes);
            }
        }

        // the batch is stored; a failed seal keeps the table appendable and
        // the next append retries it
        if writer.is_full() {
            if let Err(err) = self.rotate(&mut writer) {
                self.logger
                    .error(format_args!("sealing full table {} failed: {err}", writer.index()));
            }
        }
        Ok(())
    }

    /// Writes each run of a gapped batch into a fresh table of its own.
    ///
    /// The writer starts empty, so every table touched here holds only this
    /// batch. On failure they are all deleted and the writer restarts at the
    /// index it started from.
    fn store_runs(&self, writer: &mut TableWriter, runs: &[&[Vec<u8>]]) -> RplResult<()> {
        let start = writer.index();
        let mut sealed = Vec::new();

        if let Err(err) = self.write_runs(writer, runs, &mut sealed) {
            for table in &sealed {
                if let Err(cleanup) = table.remove() {
                    self.logger.error(format_args!(
                        "removing table {} of a failed batch failed: {cleanup}",
                        table.index()
                    ));
                }
            }
            if let Err(cleanup) = writer.discard(start) {
                self.logger.error(format_args!(
                    "discarding table {} of a failed batch failed: {cleanup}",
                    writer.index()
                ));
            }
            return Err(err);
        }

        if let Err(err) = self.install(sealed) {
            self.logger
                .error(format_args!("evicting tables after batch failed: {err}"));
        }
        Ok(())
    }

    fn write_runs(
        &self,
        writer: &mut TableWriter,
        runs: &[&[Vec<u8>]],
        sealed: &mut Vec<TableReader>,
    ) -> RplResult<()> {
        let sync = self.sync_mode == SyncMode::Always;
        for (i, run) in runs.iter().enumerate() {
            if i > 0 {
                sealed.extend(writer.seal(self.logger.as_ref())?);
            }
            writer.append_batch(run, sync, self.logger.as_ref())?;
        }
        Ok(())
    }

    /// Seals the writable table and evicts the oldest tables past `max_file_num`.
    fn rotate(&self, writer: &mut TableWriter) -> RplResult<()> {
        match writer.seal(self.logger.as_ref())? {
            Some(sealed) => self.install(vec![sealed]),
            None => Ok(()),
        }
    }

    fn install(&self, sealed: Vec<TableReader>) -> RplResult<()> {
        let mut readers = self.readers.write();
        for table in sealed {
            self.logger.debug(format_args!(
                "sealed table {} with logs {}..={}",
                table.index(),
                table.first(),
                table.last()
            ));
            readers.push(table);
        }

        if self.max_file_num > 0 && readers.len() > self.max_file_num {
            let excess = readers.len() - self.max_file_num;
            for reader in readers.drain(..excess) {
                reader.remove()?;
                self.logger.info(format_args!(
                    "removed table {} with logs {}..={}, over {} tables",
                    reader.index(),
                    reader.first(),
                    reader.last(),
                    self.max_file_num
                ));
            }
            self.cache.lock().reset();
        }
        Ok(())
    }

    fn purge(&self, n: u64) -> RplResult<()> {
        if n == 0 {
            return Ok(());
        }

        let mut writer = self.writer.write();
        self.ensure_open()?;
        let mut readers = self.readers.write();

        let mut remaining = n;
        let mut through = None;
        for reader in readers.iter() {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(reader.count());
            through = Some(reader.first() + take - 1);
            remaining -= take;
        }
        if remaining > 0 && !writer.is_empty() {
            let take = remaining.min(writer.count());
            through = Some(writer.first() + take - 1);
        }

        match through {
            Some(id) => self.purge_through(&mut writer, &mut readers, id),
            None => Ok(()),
        }
    }

    fn purge_created_before(&self, cutoff: u32) -> RplResult<()> {
        let mut writer = self.writer.write();
        self.ensure_open()?;
        let mut readers = self.readers.write();

        let mut through = None;
        let mut stopped = false;
        for reader in readers.iter() {
            if reader.last_time() <= cutoff {
                through = Some(reader.last());
                continue;
            }
            for id in reader.first()..=reader.last() {
                if reader.read_head(id)?.create_time > cutoff {
                    break;
                }
                through = Some(id);
            }
            stopped = true;
            break;
        }
        if !stopped && !writer.is_empty() {
            for id in writer.first()..=writer.last() {
                if writer.read_head(id)?.create_time > cutoff {
                    break;
                }
                through = Some(id);
            }
        }

        match through {
            Some(id) => self.purge_through(&mut writer, &mut readers, id),
            None => Ok(()),
        }
    }

    /// Deletes every record with an ID `<= id`.
    ///
    /// Whole tables are removed; the table holding `id` is rewritten to keep
    /// only what follows it. If the writable table is touched it is sealed
    /// first, so the rewrite only ever works on immutable tables.
    fn purge_through(
        &self,
        writer: &mut TableWriter,
        readers: &mut Vec<TableReader>,
        id: u64,
    ) -> RplResult<()> {
        if !writer.is_empty() && writer.first() <= id {
            if let Some(sealed) = writer.seal(self.logger.as_ref())? {
                readers.push(sealed);
            }
        }

        let whole = readers.partition_point(|reader| reader.last() <= id);
        for reader in readers.drain(..whole) {
            reader.remove()?;
        }

        if let Some(reader) = readers.first_mut() {
            if reader.first() <= id {
                *reader = reader.rewrite_from(id + 1, self.logger.as_ref())?;
            }
        }

        self.cache.lock().reset();
        self.logger
            .info(format_args!("purged logs through {id} in {}", self.dir.display()));
        Ok(())
    }

    fn sync(&self) -> RplResult<()> {
        let mut writer = self.writer.write();
        self.ensure_open()?;
        writer.sync()
    }

    fn clear(&self) -> RplResult<()> {
        let mut writer = self.writer.write();
        self.ensure_open()?;
        let mut readers = self.readers.write();

        for reader in readers.drain(..) {
            reader.remove()?;
        }
        writer.discard(1)?;
        self.cache.lock().reset();

        self.logger
            .info(format_args!("cleared file log store {}", self.dir.display()));
        Ok(())
    }

    fn close(&self) -> RplResult<()> {
        let mut writer = self.writer.write();
        let sealed = writer.seal(self.logger.as_ref());
        for reader in self.readers.read().iter() {
            reader.close();
        }
        self.cache.lock().reset();
        sealed.map(drop)
    }
}

impl LogStore for FileStore {
    fn get_log(&self, id: u64) -> RplResult<Log> {
        self.inner.ensure_open()?;
        self.inner.get_log(id)
    }

    fn seek_log(&self, id: u64) -> RplResult<Log> {
        self.inner.ensure_open()?;
        self.inner.seek_log(id)
    }

    fn first_id(&self) -> RplResult<u64> {
        self.inner.ensure_open()?;
        Ok(self.inner.first_id())
    }

    fn last_id(&self) -> RplResult<u64> {
        self.inner.ensure_open()?;
        Ok(self.inner.last_id())
    }

    fn store_logs(&self, logs: &[Log]) -> RplResult<()> {
        self.inner.store_logs(logs)
    }

    fn purge(&self, n: u64) -> RplResult<()> {
        self.inner.purge(n)
    }

    fn purge_created_before(&self, cutoff: u32) -> RplResult<()> {
        self.inner.purge_created_before(cutoff)
    }

    fn sync(&self) -> RplResult<()> {
        self.inner.sync()
    }

    fn clear(&self) -> RplResult<()> {
        self.inner.clear()
    }

    fn close(&self) -> RplResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(mut worker) = self.worker.lock().take() {
            worker.stop();
        }
        self.inner.close()?;
        self.inner
            .logger
            .info(format_args!("closed file log store {}", self.inner.dir.display()));
        Ok(())
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            self.inner
                .logger
                .error(format_args!("close file log store failed: {err}"));
        }
    }
}
