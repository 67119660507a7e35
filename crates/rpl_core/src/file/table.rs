//! Segment table format, writer and reader.

use crate::config::MAX_LOG_FILE_SIZE;
use crate::error::{RplError, RplResult};
use crate::logger::Logger;
use crate::record::{unix_now, Log, LogHead, LOG_HEAD_SIZE};
use parking_lot::Mutex;
use rpl_storage::{FileBackend, StorageBackend};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

/// Marks a cleanly sealed table. A table without it is repaired on load.
pub(crate) const TABLE_MAGIC: [u8; 20] = [
    0x1c, 0x1d, 0xb8, 0x88, 0xff, 0x9e, 0x45, 0x55, 0x40, 0xf0, 0x4c, 0xda, 0xe0, 0xce, 0x47, 0xde,
    0x65, 0x48, 0x71, 0x17,
];

/// The offset index always starts on a page boundary.
pub(crate) const PAGE_SIZE: u64 = 4096;

/// index_start (8) + index_len (4) + magic (20)
pub(crate) const TRAILER_SIZE: u64 = 32;

const TABLE_EXT: &str = ".ldb";
pub(crate) const TMP_SUFFIX: &str = ".tmp";

pub(crate) fn table_name(index: u64) -> String {
    format!("{index:08}{TABLE_EXT}")
}

pub(crate) fn table_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(table_name(index))
}

pub(crate) fn parse_table_name(name: &str) -> Option<u64> {
    let digits = name.strip_suffix(TABLE_EXT)?;
    if digits.len() < 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|&index| index > 0)
}

/// The zero-ID filler written between the last record and the padding.
pub(crate) fn split_log() -> Log {
    Log {
        id: 0,
        create_time: 1,
        compression: 1,
        data: b"ledisdb".to_vec(),
    }
}

/// Location and ID range of a sealed table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TableMeta {
    pub(crate) first: u64,
    pub(crate) last: u64,
    pub(crate) last_time: u32,
    pub(crate) index_start: u64,
    pub(crate) index_len: u32,
}

impl TableMeta {
    pub(crate) fn count(&self) -> u64 {
        self.last - self.first + 1
    }
}

pub(crate) fn read_head(backend: &dyn StorageBackend, pos: u64) -> RplResult<LogHead> {
    let bytes = backend.read_at(pos, LOG_HEAD_SIZE)?;
    LogHead::parse(&bytes)
}

pub(crate) fn read_record(backend: &dyn StorageBackend, pos: u64) -> RplResult<Vec<u8>> {
    let head = read_head(backend, pos)?;
    let len = usize::try_from(head.record_size())
        .map_err(|_| RplError::corrupted(format!("record at {pos} too large")))?;
    Ok(backend.read_at(pos, len)?)
}

/// Writes split record, padding, offset index and trailer after the records.
///
/// Returns `(index_start, index_len)`.
pub(crate) fn seal_table(
    backend: &mut dyn StorageBackend,
    offsets: &[u32],
) -> RplResult<(u64, u32)> {
    let index_len = u32::try_from(offsets.len() * 4)
        .map_err(|_| RplError::corrupted("offset index exceeds 4 GiB"))?;

    backend.append(&split_log().marshal()?)?;

    let size = backend.size()?;
    let rem = size % PAGE_SIZE;
    if rem != 0 {
        backend.append(&vec![0u8; (PAGE_SIZE - rem) as usize])?;
    }

    let index_start = backend.size()?;
    let mut tail = Vec::with_capacity(offsets.len() * 4 + TRAILER_SIZE as usize);
    for offset in offsets {
        tail.extend_from_slice(&offset.to_be_bytes());
    }
    tail.extend_from_slice(&index_start.to_be_bytes());
    tail.extend_from_slice(&index_len.to_be_bytes());
    tail.extend_from_slice(&TABLE_MAGIC);
    backend.append(&tail)?;

    backend.sync()?;
    Ok((index_start, index_len))
}

/// Validates the trailer of a sealed table and reads its ID range.
///
/// Every structural problem is reported as [`RplError::Corrupted`], which
/// callers take as "needs repair".
pub(crate) fn load_table_meta(backend: &dyn StorageBackend) -> RplResult<TableMeta> {
    let size = backend.size()?;
    if size < PAGE_SIZE + TRAILER_SIZE {
        return Err(RplError::corrupted(format!("file size {size} too short")));
    }

    let tail = backend.read_at(size - TRAILER_SIZE, TRAILER_SIZE as usize)?;
    if tail[12..] != TABLE_MAGIC {
        return Err(RplError::corrupted("missing magic"));
    }

    let mut buf8 = [0u8; 8];
    buf8.copy_from_slice(&tail[0..8]);
    let index_start = u64::from_be_bytes(buf8);
    let mut buf4 = [0u8; 4];
    buf4.copy_from_slice(&tail[8..12]);
    let index_len = u32::from_be_bytes(buf4);

    if index_start % PAGE_SIZE != 0 {
        return Err(RplError::corrupted(format!(
            "index start {index_start} is not page aligned"
        )));
    }
    if index_len == 0 || index_len % 4 != 0 {
        return Err(RplError::corrupted(format!("invalid index length {index_len}")));
    }
    if index_start + u64::from(index_len) != size - TRAILER_SIZE {
        return Err(RplError::corrupted(format!(
            "index {index_start}+{index_len} does not end at trailer"
        )));
    }

    let first_pos = u64::from(backend.read_u32_at(index_start)?);
    let last_pos = u64::from(backend.read_u32_at(index_start + u64::from(index_len) - 4)?);
    if first_pos != 0 {
        return Err(RplError::corrupted(format!("first record at {first_pos}, must be 0")));
    }
    if last_pos + LOG_HEAD_SIZE as u64 > index_start {
        return Err(RplError::corrupted(format!("last record at {last_pos} overlaps index")));
    }

    let first = read_head(backend, first_pos)?;
    let last = read_head(backend, last_pos)?;

    let split_pos = last_pos + last.record_size();
    if split_pos + LOG_HEAD_SIZE as u64 > index_start
        || read_head(backend, split_pos)?.id != 0
    {
        return Err(RplError::corrupted("missing split record"));
    }

    if first.id == 0 || first.id > last.id {
        return Err(RplError::corrupted(format!(
            "invalid id range {}..={}",
            first.id, last.id
        )));
    }
    if last.id - first.id + 1 != u64::from(index_len / 4) {
        return Err(RplError::corrupted(format!(
            "id range {}..={} does not match {} offsets",
            first.id,
            last.id,
            index_len / 4
        )));
    }

    Ok(TableMeta {
        first: first.id,
        last: last.id,
        last_time: last.create_time,
        index_start,
        index_len,
    })
}

/// Complete records found by scanning a table from the start.
#[derive(Debug, Default)]
pub(crate) struct TableScan {
    pub(crate) offsets: Vec<u32>,
    pub(crate) first: u64,
    pub(crate) last: u64,
    pub(crate) last_time: u32,
    /// Byte position just after the last complete record.
    pub(crate) end: u64,
}

/// Scans records from offset 0, stopping at the split record, at the first
/// record that does not fit in the file, or at a break in ID contiguity.
pub(crate) fn scan_table(backend: &dyn StorageBackend) -> RplResult<TableScan> {
    let size = backend.size()?;
    let mut scan = TableScan::default();
    let mut pos = 0u64;

    while pos + LOG_HEAD_SIZE as u64 <= size {
        let head = read_head(backend, pos)?;
        if head.id == 0 {
            break;
        }
        if scan.last != 0 && head.id != scan.last + 1 {
            break;
        }
        let end = pos + head.record_size();
        if end > size {
            break;
        }
        let Ok(offset) = u32::try_from(pos) else {
            break;
        };

        scan.offsets.push(offset);
        if scan.first == 0 {
            scan.first = head.id;
        }
        scan.last = head.id;
        scan.last_time = head.create_time;
        scan.end = end;
        pos = end;
    }

    Ok(scan)
}

/// Cuts an unclean table after its last complete record and reseals it.
///
/// Returns `None` when the table holds no complete record.
pub(crate) fn repair_table(backend: &mut dyn StorageBackend) -> RplResult<Option<TableMeta>> {
    let scan = scan_table(backend)?;
    if scan.offsets.is_empty() {
        return Ok(None);
    }

    backend.truncate(scan.end)?;
    let (index_start, index_len) = seal_table(backend, &scan.offsets)?;

    Ok(Some(TableMeta {
        first: scan.first,
        last: scan.last,
        last_time: scan.last_time,
        index_start,
        index_len,
    }))
}

/// Writer state to fall back to when a batch fails.
#[derive(Clone, Copy)]
struct WriterMark {
    offset_pos: u64,
    count: usize,
    first: u64,
    last: u64,
    last_time: u32,
}

/// The single writable table of a file store.
pub(crate) struct TableWriter {
    dir: PathBuf,
    index: u64,
    path: PathBuf,
    backend: Option<Box<dyn StorageBackend>>,
    first: u64,
    last: u64,
    last_time: u32,
    offsets: Vec<u32>,
    offset_pos: u64,
    max_file_size: u64,
}

impl TableWriter {
    pub(crate) fn new(dir: &Path, index: u64, max_file_size: u64) -> Self {
        Self::at_path(dir, index, table_path(dir, index), max_file_size)
    }

    /// A writer for `index` that writes to `path` instead of the table's own name.
    pub(crate) fn at_path(dir: &Path, index: u64, path: PathBuf, max_file_size: u64) -> Self {
        Self {
            dir: dir.to_path_buf(),
            index,
            path,
            backend: None,
            first: 0,
            last: 0,
            last_time: 0,
            offsets: Vec::new(),
            offset_pos: 0,
            max_file_size,
        }
    }

    pub(crate) fn index(&self) -> u64 {
        self.index
    }

    pub(crate) fn first(&self) -> u64 {
        self.first
    }

    pub(crate) fn last(&self) -> u64 {
        self.last
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub(crate) fn count(&self) -> u64 {
        self.offsets.len() as u64
    }

    pub(crate) fn contains(&self, id: u64) -> bool {
        !self.is_empty() && id >= self.first && id <= self.last
    }

    /// Whether a run starting at `id` with `len` encoded bytes has to start a new table.
    ///
    /// Records must end below [`MAX_LOG_FILE_SIZE`] so every offset fits the u32 index.
    pub(crate) fn needs_rotation(&self, id: u64, len: u64) -> bool {
        !self.is_empty()
            && (id != self.last + 1
                || self.offset_pos >= self.max_file_size
                || self.offset_pos + len > MAX_LOG_FILE_SIZE)
    }

    pub(crate) fn is_full(&self) -> bool {
        !self.is_empty() && self.offset_pos >= self.max_file_size
    }

    fn backend(&mut self) -> RplResult<&mut Box<dyn StorageBackend>> {
        if self.backend.is_none() {
            let mut backend = FileBackend::open(&self.path)?;
            if backend.size()? > 0 {
                backend.truncate(0)?;
            }
            self.backend = Some(Box::new(backend));
        }
        self.backend.as_mut().ok_or(RplError::Closed)
    }

    /// Appends one encoded record. The caller has checked contiguity.
    pub(crate) fn append(&mut self, encoded: &[u8]) -> RplResult<()> {
        let head = LogHead::parse(encoded)?;
        debug_assert!(self.is_empty() || head.id == self.last + 1);

        let offset = self.backend()?.append(encoded)?;
        let pos = u32::try_from(offset).map_err(|_| {
            RplError::corrupted(format!("table {} passed the 4 GiB offset limit", self.index))
        })?;
        self.offset_pos = offset + encoded.len() as u64;
        self.offsets.push(pos);
        if self.first == 0 {
            self.first = head.id;
        }
        self.last = head.id;
        self.last_time = head.create_time;
        Ok(())
    }

    /// Appends a contiguous run of encoded records as one unit and hands
    /// them to the OS, syncing as well when `sync` is set.
    ///
    /// If any step fails the table is cut back to where the run started and
    /// none of the run stays visible.
    pub(crate) fn append_batch(
        &mut self,
        records: &[Vec<u8>],
        sync: bool,
        logger: &dyn Logger,
    ) -> RplResult<()> {
        let mark = WriterMark {
            offset_pos: self.offset_pos,
            count: self.offsets.len(),
            first: self.first,
            last: self.last,
            last_time: self.last_time,
        };

        let written = records
            .iter()
            .try_for_each(|encoded| self.append(encoded))
            .and_then(|()| if sync { self.sync() } else { self.flush() });
        if let Err(err) = written {
            self.rollback(mark, logger);
            return Err(err);
        }
        Ok(())
    }

    fn rollback(&mut self, mark: WriterMark, logger: &dyn Logger) {
        if let Some(backend) = self.backend.as_mut() {
            // offsets come from the backend, so a failed cut only leaves
            // unindexed bytes behind
            if let Err(err) = backend.truncate(mark.offset_pos) {
                logger.error(format_args!(
                    "cutting table {} back to {} bytes failed: {err}",
                    self.path.display(),
                    mark.offset_pos
                ));
            }
        }
        self.offsets.truncate(mark.count);
        self.offset_pos = mark.offset_pos;
        self.first = mark.first;
        self.last = mark.last;
        self.last_time = mark.last_time;
    }

    fn position(&self, id: u64) -> RplResult<u64> {
        if !self.contains(id) {
            return Err(RplError::LogNotFound);
        }
        Ok(u64::from(self.offsets[(id - self.first) as usize]))
    }

    fn open_backend(&self) -> RplResult<&dyn StorageBackend> {
        self.backend.as_deref().ok_or(RplError::LogNotFound)
    }

    pub(crate) fn read_record(&self, id: u64) -> RplResult<Vec<u8>> {
        let pos = self.position(id)?;
        read_record(self.open_backend()?, pos)
    }

    pub(crate) fn read_head(&self, id: u64) -> RplResult<LogHead> {
        let pos = self.position(id)?;
        read_head(self.open_backend()?, pos)
    }

    pub(crate) fn flush(&mut self) -> RplResult<()> {
        if let Some(backend) = self.backend.as_mut() {
            backend.flush()?;
        }
        Ok(())
    }

    pub(crate) fn sync(&mut self) -> RplResult<()> {
        if let Some(backend) = self.backend.as_mut() {
            backend.sync()?;
        }
        Ok(())
    }

    /// Seals the current table into a reader and moves on to the next index.
    pub(crate) fn seal(&mut self, logger: &dyn Logger) -> RplResult<Option<TableReader>> {
        if self.is_empty() {
            return Ok(None);
        }

        let mut backend = self.backend.take().ok_or(RplError::Closed)?;
        let (index_start, index_len) = match seal_table(backend.as_mut(), &self.offsets) {
            Ok(sealed) => sealed,
            Err(err) => {
                // leave the table appendable; a torn trailer would hide later records
                if let Err(cut) = backend.truncate(self.offset_pos) {
                    logger.error(format_args!(
                        "dropping torn seal of table {} failed: {cut}",
                        self.path.display()
                    ));
                }
                self.backend = Some(backend);
                return Err(err);
            }
        };

        let meta = TableMeta {
            first: self.first,
            last: self.last,
            last_time: self.last_time,
            index_start,
            index_len,
        };
        let reader = TableReader::sealed(self.path.clone(), self.index, meta, Some(backend));

        self.reset(self.index + 1);
        Ok(Some(reader))
    }

    /// Deletes the current table file and restarts empty at `index`.
    ///
    /// The writer restarts even when the file cannot be removed.
    pub(crate) fn discard(&mut self, index: u64) -> RplResult<()> {
        self.backend = None;
        let removed = remove_if_exists(&self.path);
        self.reset(index);
        removed
    }

    fn reset(&mut self, index: u64) {
        self.backend = None;
        self.index = index;
        self.path = table_path(&self.dir, index);
        self.first = 0;
        self.last = 0;
        self.last_time = 0;
        self.offsets.clear();
        self.offset_pos = 0;
    }
}

/// An immutable sealed table.
///
/// The file handle is opened lazily and dropped again by
/// [`TableReader::close_if_idle`], so many sealed tables do not pin file
/// descriptors.
pub(crate) struct TableReader {
    path: PathBuf,
    index: u64,
    meta: TableMeta,
    handle: Mutex<Option<Box<dyn StorageBackend>>>,
    last_read: AtomicU32,
}

impl TableReader {
    /// Opens a table from disk, repairing it if it was not sealed cleanly.
    ///
    /// Returns `None` after removing a table with no complete record.
    pub(crate) fn open(dir: &Path, index: u64, logger: &dyn Logger) -> RplResult<Option<Self>> {
        let path = table_path(dir, index);
        let mut backend = FileBackend::open_existing(&path)?;

        let meta = match load_table_meta(&backend) {
            Ok(meta) => meta,
            Err(RplError::Corrupted { message }) => {
                logger.warn(format_args!(
                    "table {} not sealed cleanly ({message}), repairing",
                    path.display()
                ));
                match repair_table(&mut backend)? {
                    Some(meta) => {
                        logger.info(format_args!(
                            "repaired table {}, kept logs {}..={}",
                            path.display(),
                            meta.first,
                            meta.last
                        ));
                        meta
                    }
                    None => {
                        drop(backend);
                        logger.warn(format_args!(
                            "table {} has no complete log, removing it",
                            path.display()
                        ));
                        remove_if_exists(&path)?;
                        return Ok(None);
                    }
                }
            }
            Err(err) => return Err(err),
        };

        Ok(Some(Self::sealed(path, index, meta, Some(Box::new(backend)))))
    }

    pub(crate) fn sealed(
        path: PathBuf,
        index: u64,
        meta: TableMeta,
        handle: Option<Box<dyn StorageBackend>>,
    ) -> Self {
        Self {
            path,
            index,
            meta,
            handle: Mutex::new(handle),
            last_read: AtomicU32::new(unix_now()),
        }
    }

    pub(crate) fn index(&self) -> u64 {
        self.index
    }

    pub(crate) fn first(&self) -> u64 {
        self.meta.first
    }

    pub(crate) fn last(&self) -> u64 {
        self.meta.last
    }

    pub(crate) fn last_time(&self) -> u32 {
        self.meta.last_time
    }

    pub(crate) fn count(&self) -> u64 {
        self.meta.count()
    }

    pub(crate) fn contains(&self, id: u64) -> bool {
        id >= self.meta.first && id <= self.meta.last
    }

    fn with_backend<T>(
        &self,
        id: u64,
        f: impl FnOnce(&dyn StorageBackend, u64) -> RplResult<T>,
    ) -> RplResult<T> {
        if !self.contains(id) {
            return Err(RplError::LogNotFound);
        }
        self.last_read.store(unix_now(), Ordering::Relaxed);

        let mut handle = self.handle.lock();
        if handle.is_none() {
            *handle = Some(Box::new(FileBackend::open_existing(&self.path)?));
        }
        let backend = handle.as_deref().ok_or(RplError::Closed)?;

        let slot = self.meta.index_start + (id - self.meta.first) * 4;
        let pos = u64::from(backend.read_u32_at(slot)?);
        f(backend, pos)
    }

    pub(crate) fn read_record(&self, id: u64) -> RplResult<Vec<u8>> {
        let bytes = self.with_backend(id, read_record)?;
        let head = LogHead::parse(&bytes)?;
        if head.id != id {
            return Err(RplError::corrupted(format!(
                "table {} holds log {} where {id} was indexed",
                self.index, head.id
            )));
        }
        Ok(bytes)
    }

    pub(crate) fn read_head(&self, id: u64) -> RplResult<LogHead> {
        self.with_backend(id, read_head)
    }

    /// Drops the file handle if nothing read the table for `keepalive` seconds.
    pub(crate) fn close_if_idle(&self, now: u32, keepalive: u32) -> bool {
        let last = self.last_read.load(Ordering::Relaxed);
        if now.saturating_sub(last) <= keepalive {
            return false;
        }
        self.handle.lock().take().is_some()
    }

    pub(crate) fn is_open(&self) -> bool {
        self.handle.lock().is_some()
    }

    pub(crate) fn close(&self) {
        self.handle.lock().take();
    }

    /// Closes and deletes the table file.
    pub(crate) fn remove(&self) -> RplResult<()> {
        self.close();
        remove_if_exists(&self.path)
    }

    /// Rewrites the table so it only holds `keep_from..=last`, under the same index.
    pub(crate) fn rewrite_from(&self, keep_from: u64, logger: &dyn Logger) -> RplResult<Self> {
        let mut tmp_name = self.path.as_os_str().to_os_string();
        tmp_name.push(TMP_SUFFIX);
        let tmp = PathBuf::from(tmp_name);
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));

        remove_if_exists(&tmp)?;
        let mut writer = TableWriter::at_path(dir, self.index, tmp.clone(), u64::MAX);
        for id in keep_from.max(self.meta.first)..=self.meta.last {
            writer.append(&self.read_record(id)?)?;
        }
        let meta = writer
            .seal(logger)?
            .map(|rewritten| rewritten.meta)
            .ok_or_else(|| RplError::invalid_argument("rewrite would leave the table empty"))?;

        self.close();
        fs::rename(&tmp, &self.path)?;

        Ok(Self::sealed(self.path.clone(), self.index, meta, None))
    }
}

fn remove_if_exists(path: &Path) -> RplResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::{LogLevel, MemoryLogger, NoopLogger};
    use rpl_storage::{InMemoryBackend, StorageError, StorageResult};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn log(id: u64, fill: u8, len: usize) -> Log {
        Log {
            id,
            create_time: 100 + id as u32,
            compression: 0,
            data: vec![fill; len],
        }
    }

    fn write_records(backend: &mut dyn StorageBackend, ids: std::ops::RangeInclusive<u64>) -> Vec<u32> {
        ids.map(|id| {
            let offset = backend.append(&log(id, id as u8, 100).marshal().unwrap()).unwrap();
            offset as u32
        })
        .collect()
    }

    #[test]
    fn table_names() {
        assert_eq!(table_name(7), "00000007.ldb");
        assert_eq!(parse_table_name("00000007.ldb"), Some(7));
        assert_eq!(parse_table_name("123456789.ldb"), Some(123_456_789));
        assert_eq!(parse_table_name("7.ldb"), None);
        assert_eq!(parse_table_name("00000000.ldb"), None);
        assert_eq!(parse_table_name("00000007.ldb.tmp"), None);
        assert_eq!(parse_table_name("commit.log"), None);
    }

    #[test]
    fn sealed_layout() {
        let mut backend = InMemoryBackend::new();
        let offsets = write_records(&mut backend, 1..=3);
        let (index_start, index_len) = seal_table(&mut backend, &offsets).unwrap();

        assert_eq!(index_start % PAGE_SIZE, 0);
        assert_eq!(index_len, 12);
        assert_eq!(backend.size().unwrap(), index_start + 12 + TRAILER_SIZE);
        assert_eq!(backend.sync_count(), 1);
        assert_eq!(backend.unsynced_len(), 0);

        let data = backend.data();
        assert_eq!(&data[data.len() - 20..], &TABLE_MAGIC);

        // split record right after the last record
        let split_pos = u64::from(offsets[2]) + log(3, 3, 100).size() as u64;
        let split = read_head(&backend, split_pos).unwrap();
        assert_eq!(split.id, 0);

        let meta = load_table_meta(&backend).unwrap();
        assert_eq!((meta.first, meta.last, meta.count()), (1, 3, 3));
        assert_eq!(meta.last_time, 103);
        assert_eq!(meta.index_start, index_start);
    }

    #[test]
    fn load_rejects_unsealed_table() {
        let mut backend = InMemoryBackend::new();
        write_records(&mut backend, 1..=3);
        assert!(matches!(
            load_table_meta(&backend),
            Err(RplError::Corrupted { .. })
        ));

        let mut big = InMemoryBackend::new();
        write_records(&mut big, 1..=60);
        assert!(matches!(
            load_table_meta(&big),
            Err(RplError::Corrupted { .. })
        ));
    }

    #[test]
    fn load_rejects_torn_trailer() {
        let mut backend = InMemoryBackend::new();
        let offsets = write_records(&mut backend, 1..=3);
        seal_table(&mut backend, &offsets).unwrap();
        let size = backend.size().unwrap();
        backend.truncate(size - 5).unwrap();

        assert!(matches!(
            load_table_meta(&backend),
            Err(RplError::Corrupted { .. })
        ));
    }

    #[test]
    fn repair_discards_partial_record() {
        let mut backend = InMemoryBackend::new();
        write_records(&mut backend, 1..=4);
        let torn = log(5, 5, 100).marshal().unwrap();
        backend.append(&torn[..60]).unwrap();

        let meta = repair_table(&mut backend).unwrap().unwrap();
        assert_eq!((meta.first, meta.last), (1, 4));
        assert_eq!(load_table_meta(&backend).unwrap(), meta);
    }

    #[test]
    fn repair_discards_partial_head() {
        let mut backend = InMemoryBackend::new();
        write_records(&mut backend, 1..=2);
        backend.append(&[0u8; 9]).unwrap();

        let meta = repair_table(&mut backend).unwrap().unwrap();
        assert_eq!((meta.first, meta.last), (1, 2));
    }

    #[test]
    fn repair_of_torn_seal_keeps_records() {
        let mut backend = InMemoryBackend::new();
        let offsets = write_records(&mut backend, 1..=3);
        seal_table(&mut backend, &offsets).unwrap();
        // cut into the padding: split record survives, trailer is gone
        let split_end = u64::from(offsets[2]) + 117 + split_log().size() as u64;
        backend.truncate(split_end + 10).unwrap();

        let meta = repair_table(&mut backend).unwrap().unwrap();
        assert_eq!((meta.first, meta.last), (1, 3));
    }

    #[test]
    fn repair_after_power_cut_keeps_synced_records() {
        let mut backend = InMemoryBackend::new();
        write_records(&mut backend, 1..=3);
        backend.sync().unwrap();
        write_records(&mut backend, 4..=5);
        backend.lose_unsynced();

        let meta = repair_table(&mut backend).unwrap().unwrap();
        assert_eq!((meta.first, meta.last), (1, 3));
        assert_eq!(backend.unsynced_len(), 0);
    }

    #[test]
    fn repair_of_empty_table_finds_nothing() {
        let mut backend = InMemoryBackend::with_data(vec![0u8; 5]);
        assert!(repair_table(&mut backend).unwrap().is_none());
    }

    #[test]
    fn writer_reads_back_and_seals() {
        let dir = tempdir().unwrap();
        let mut writer = TableWriter::new(dir.path(), 1, 1024 * 1024);

        for id in 1..=10 {
            writer.append(&log(id, id as u8, 4096).marshal().unwrap()).unwrap();
        }
        assert_eq!((writer.first(), writer.last(), writer.count()), (1, 10, 10));
        assert!(writer.needs_rotation(12, 10));
        assert!(!writer.needs_rotation(11, 10));

        let bytes = writer.read_record(7).unwrap();
        assert_eq!(Log::unmarshal(&bytes).unwrap(), log(7, 7, 4096));
        assert!(writer.read_record(11).unwrap_err().is_not_found());

        let reader = writer.seal(&NoopLogger).unwrap().unwrap();
        assert_eq!(writer.index(), 2);
        assert!(writer.is_empty());
        assert_eq!((reader.first(), reader.last()), (1, 10));

        for id in 1..=10 {
            let got = Log::unmarshal(&reader.read_record(id).unwrap()).unwrap();
            assert_eq!(got, log(id, id as u8, 4096));
        }
        assert!(reader.read_record(11).unwrap_err().is_not_found());
    }

    #[test]
    fn writer_rotates_when_full() {
        let dir = tempdir().unwrap();
        let mut writer = TableWriter::new(dir.path(), 1, 300);

        writer.append(&log(1, 1, 200).marshal().unwrap()).unwrap();
        assert!(!writer.is_full());
        writer.append(&log(2, 2, 200).marshal().unwrap()).unwrap();
        assert!(writer.is_full());
        assert!(writer.needs_rotation(3, 10));
    }

    /// Fails appends once its budget runs out, and optionally every truncate.
    struct FlakyBackend {
        inner: InMemoryBackend,
        appends_left: Arc<AtomicUsize>,
        fail_truncate: bool,
    }

    impl FlakyBackend {
        fn boxed(appends_left: &Arc<AtomicUsize>, fail_truncate: bool) -> Box<dyn StorageBackend> {
            Box::new(Self {
                inner: InMemoryBackend::new(),
                appends_left: Arc::clone(appends_left),
                fail_truncate,
            })
        }
    }

    fn disk_full() -> StorageError {
        StorageError::Io(io::Error::other("no space left on device"))
    }

    impl StorageBackend for FlakyBackend {
        fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
            self.inner.read_at(offset, len)
        }

        fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
            let left = self.appends_left.load(Ordering::SeqCst);
            if left == 0 {
                return Err(disk_full());
            }
            self.appends_left.store(left - 1, Ordering::SeqCst);
            self.inner.append(data)
        }

        fn flush(&mut self) -> StorageResult<()> {
            self.inner.flush()
        }

        fn size(&self) -> StorageResult<u64> {
            self.inner.size()
        }

        fn sync(&mut self) -> StorageResult<()> {
            self.inner.sync()
        }

        fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
            if self.fail_truncate {
                return Err(disk_full());
            }
            self.inner.truncate(new_size)
        }
    }

    fn encoded(ids: std::ops::RangeInclusive<u64>) -> Vec<Vec<u8>> {
        ids.map(|id| log(id, id as u8, 30).marshal().unwrap()).collect()
    }

    #[test]
    fn failed_batch_leaves_no_trace() {
        let dir = tempdir().unwrap();
        let budget = Arc::new(AtomicUsize::new(3));
        let mut writer = TableWriter::new(dir.path(), 1, u64::MAX);
        writer.backend = Some(FlakyBackend::boxed(&budget, false));

        writer.append_batch(&encoded(1..=1), false, &NoopLogger).unwrap();
        let committed = writer.offset_pos;

        // 2 and 3 fit the budget, 4 does not
        assert!(writer.append_batch(&encoded(2..=4), false, &NoopLogger).is_err());
        assert_eq!((writer.first(), writer.last(), writer.count()), (1, 1, 1));
        assert_eq!(writer.offset_pos, committed);
        assert_eq!(writer.backend.as_ref().unwrap().size().unwrap(), committed);
        assert!(writer.read_record(2).unwrap_err().is_not_found());

        budget.store(usize::MAX, Ordering::SeqCst);
        writer.append_batch(&encoded(2..=4), false, &NoopLogger).unwrap();
        assert_eq!(writer.last(), 4);
        for id in 1..=4 {
            let got = Log::unmarshal(&writer.read_record(id).unwrap()).unwrap();
            assert_eq!(got, log(id, id as u8, 30));
        }
    }

    #[test]
    fn failed_rollback_is_logged_and_offsets_stay_true() {
        let dir = tempdir().unwrap();
        let budget = Arc::new(AtomicUsize::new(2));
        let logger = MemoryLogger::new();
        let mut writer = TableWriter::new(dir.path(), 1, u64::MAX);
        writer.backend = Some(FlakyBackend::boxed(&budget, true));

        writer.append_batch(&encoded(1..=1), false, &logger).unwrap();
        assert!(writer.append_batch(&encoded(2..=3), false, &logger).is_err());
        assert!(logger.contains(LogLevel::Error, "cutting table"));
        assert_eq!(writer.last(), 1);

        // record 2 stays behind unindexed; the retry is indexed after it
        budget.store(usize::MAX, Ordering::SeqCst);
        writer.append_batch(&encoded(2..=3), false, &logger).unwrap();
        for id in 1..=3 {
            let got = Log::unmarshal(&writer.read_record(id).unwrap()).unwrap();
            assert_eq!(got, log(id, id as u8, 30));
        }
    }

    #[test]
    fn failed_seal_rollback_is_logged() {
        let dir = tempdir().unwrap();
        let budget = Arc::new(AtomicUsize::new(1));
        let logger = MemoryLogger::new();
        let mut writer = TableWriter::new(dir.path(), 1, u64::MAX);
        writer.backend = Some(FlakyBackend::boxed(&budget, true));
        writer.append_batch(&encoded(1..=1), false, &logger).unwrap();

        assert!(writer.seal(&logger).is_err());
        assert!(logger.contains(LogLevel::Error, "dropping torn seal"));
        assert_eq!(writer.index(), 1);
        assert_eq!(writer.last(), 1);
        assert!(writer.backend.is_some());
    }

    #[test]
    fn batch_is_flushed_to_the_file() {
        let dir = tempdir().unwrap();
        let mut writer = TableWriter::new(dir.path(), 1, u64::MAX);
        writer.append_batch(&encoded(1..=3), false, &NoopLogger).unwrap();

        let on_disk = fs::read(table_path(dir.path(), 1)).unwrap();
        assert_eq!(on_disk.len() as u64, writer.offset_pos);
        assert_eq!(Log::unmarshal(&on_disk[..LOG_HEAD_SIZE + 30]).unwrap(), log(1, 1, 30));
    }

    #[test]
    fn offset_ceiling_forces_rotation() {
        let dir = tempdir().unwrap();
        let mut writer = TableWriter::new(dir.path(), 1, u64::MAX);
        writer.append(&log(1, 1, 10).marshal().unwrap()).unwrap();

        writer.offset_pos = MAX_LOG_FILE_SIZE - 100;
        assert!(!writer.is_full());
        assert!(!writer.needs_rotation(2, 100));
        assert!(writer.needs_rotation(2, 101));
    }

    #[test]
    fn reader_reopens_from_disk() {
        let dir = tempdir().unwrap();
        let mut writer = TableWriter::new(dir.path(), 1, 1024 * 1024);
        for id in 5..=9 {
            writer.append(&log(id, id as u8, 10).marshal().unwrap()).unwrap();
        }
        writer.seal(&NoopLogger).unwrap().unwrap();

        let reader = TableReader::open(dir.path(), 1, &NoopLogger).unwrap().unwrap();
        assert_eq!((reader.first(), reader.last(), reader.last_time()), (5, 9, 109));
        assert_eq!(reader.read_head(6).unwrap().id, 6);
    }

    #[test]
    fn reader_repairs_unsealed_file() {
        let dir = tempdir().unwrap();
        let path = table_path(dir.path(), 3);
        {
            let mut backend = FileBackend::open(&path).unwrap();
            for id in 1..=3 {
                backend.append(&log(id, 0, 50).marshal().unwrap()).unwrap();
            }
            backend.append(&[1, 2, 3]).unwrap();
        }

        let logger = MemoryLogger::new();
        let reader = TableReader::open(dir.path(), 3, &logger).unwrap().unwrap();
        assert_eq!((reader.first(), reader.last()), (1, 3));
        assert!(logger.contains(LogLevel::Warn, "not sealed cleanly"));

        drop(reader);
        let again = MemoryLogger::new();
        TableReader::open(dir.path(), 3, &again).unwrap().unwrap();
        assert!(again.entries().is_empty());
    }

    #[test]
    fn reader_removes_unrecoverable_file() {
        let dir = tempdir().unwrap();
        let path = table_path(dir.path(), 1);
        fs::write(&path, b"").unwrap();

        assert!(TableReader::open(dir.path(), 1, &NoopLogger).unwrap().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn reader_keepalive_closes_idle_handle() {
        let dir = tempdir().unwrap();
        let mut writer = TableWriter::new(dir.path(), 1, 1024);
        writer.append(&log(1, 1, 10).marshal().unwrap()).unwrap();
        let reader = writer.seal(&NoopLogger).unwrap().unwrap();

        let now = unix_now();
        assert!(!reader.close_if_idle(now, 30));
        assert!(reader.close_if_idle(now + 31, 30));
        assert!(!reader.is_open());

        reader.read_record(1).unwrap();
        assert!(reader.is_open());
    }

    #[test]
    fn rewrite_keeps_tail_under_same_index() {
        let dir = tempdir().unwrap();
        let mut writer = TableWriter::new(dir.path(), 4, 1024 * 1024);
        for id in 1..=6 {
            writer.append(&log(id, id as u8, 30).marshal().unwrap()).unwrap();
        }
        let reader = writer.seal(&NoopLogger).unwrap().unwrap();

        let rewritten = reader.rewrite_from(4, &NoopLogger).unwrap();
        assert_eq!(rewritten.index(), 4);
        assert_eq!((rewritten.first(), rewritten.last()), (4, 6));
        assert!(rewritten.read_record(3).unwrap_err().is_not_found());

        let reopened = TableReader::open(dir.path(), 4, &NoopLogger).unwrap().unwrap();
        assert_eq!((reopened.first(), reopened.last()), (4, 6));
        assert_eq!(
            Log::unmarshal(&reopened.read_record(5).unwrap()).unwrap(),
            log(5, 5, 30)
        );
        assert!(!table_path(dir.path(), 4).with_extension("ldb.tmp").exists());
    }
}
