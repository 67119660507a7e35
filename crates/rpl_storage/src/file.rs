//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Write buffer size. Log records are usually far smaller than a page.
const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// A storage backend over a single OS file.
///
/// Each segment table of a file store is one `FileBackend`. Appends go
/// through a write buffer; reads, `flush`, `sync` and `truncate` drain it
/// first, so a read always sees every appended byte.
///
/// # Durability
///
/// - `flush()` hands buffered bytes to the OS
/// - `sync()` also calls `File::sync_data()`, which covers the file length
///
/// # Example
///
/// ```no_run
/// use rpl_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("00000001.ldb")).unwrap();
/// backend.append(b"record bytes").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    handle: Mutex<Handle>,
}

#[derive(Debug)]
struct Handle {
    writer: BufWriter<File>,
    len: u64,
    /// The file cursor sits at `len`, so appends need no seek.
    at_end: bool,
}

impl Handle {
    fn drain(&mut self) -> StorageResult<&mut File> {
        self.writer.flush()?;
        Ok(self.writer.get_mut())
    }
}

impl FileBackend {
    /// Opens or creates the file at `path` for reading and appending.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::wrap(path, file)
    }

    /// Opens an existing file without creating it.
    ///
    /// Sealed tables are opened this way so a vanished file surfaces as
    /// `NotFound` instead of being silently recreated empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open_existing(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::wrap(path, file)
    }

    fn wrap(path: &Path, file: File) -> StorageResult<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            handle: Mutex::new(Handle {
                writer: BufWriter::with_capacity(WRITE_BUFFER_SIZE, file),
                len,
                at_end: false,
            }),
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut handle = self.handle.lock();
        let size = handle.len;
        if offset.saturating_add(len as u64) > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        handle.at_end = false;
        let file = handle.drain()?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let handle = self.handle.get_mut();
        let offset = handle.len;
        if data.is_empty() {
            return Ok(offset);
        }

        if !handle.at_end {
            handle.writer.seek(SeekFrom::Start(offset))?;
            handle.at_end = true;
        }
        if let Err(err) = handle.writer.write_all(data) {
            // part of `data` may have reached the file; seek before the next append
            handle.at_end = false;
            return Err(err.into());
        }
        handle.len += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.handle.get_mut().drain()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.handle.lock().len)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.handle.get_mut().drain()?.sync_data()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let handle = self.handle.get_mut();
        if new_size > handle.len {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: handle.len,
            });
        }

        let file = handle.drain()?;
        file.set_len(new_size)?;
        file.sync_all()?;
        handle.len = new_size;
        handle.at_end = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn table(dir: &Path) -> FileBackend {
        FileBackend::open(&dir.join("00000001.ldb")).unwrap()
    }

    #[test]
    fn open_creates_empty_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("00000001.ldb");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
        assert_eq!(backend.path(), path);
    }

    #[test]
    fn open_existing_does_not_create() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("00000009.ldb");

        let err = FileBackend::open_existing(&path).unwrap_err();
        assert!(matches!(&err, StorageError::Io(e) if e.kind() == std::io::ErrorKind::NotFound));
        assert!(!path.exists());
    }

    #[test]
    fn buffered_appends_are_readable() {
        let dir = tempdir().unwrap();
        let mut backend = table(dir.path());

        assert_eq!(backend.append(b"head").unwrap(), 0);
        assert_eq!(backend.append(b"|body").unwrap(), 4);
        assert_eq!(backend.size().unwrap(), 9);
        assert_eq!(backend.read_at(5, 4).unwrap(), b"body");

        // the read moved the cursor; the next append still lands at the end
        assert_eq!(backend.append(b"|tail").unwrap(), 9);
        assert_eq!(backend.read_at(0, 14).unwrap(), b"head|body|tail");
    }

    #[test]
    fn read_past_end_fails() {
        let dir = tempdir().unwrap();
        let mut backend = table(dir.path());
        backend.append(b"record").unwrap();

        assert!(backend.read_at(4, 5).unwrap_err().is_read_past_end());
        assert!(backend.read_at(u64::MAX, 1).unwrap_err().is_read_past_end());
        assert!(backend.read_at(6, 0).unwrap().is_empty());
    }

    #[test]
    fn big_endian_helpers() {
        let dir = tempdir().unwrap();
        let mut backend = table(dir.path());
        backend.append(&7u64.to_be_bytes()).unwrap();
        backend.append(&0x0102_0304u32.to_be_bytes()).unwrap();

        assert_eq!(backend.read_u64_at(0).unwrap(), 7);
        assert_eq!(backend.read_u32_at(8).unwrap(), 0x0102_0304);
    }

    #[test]
    fn synced_bytes_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("00000001.ldb");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"sealed table").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open_existing(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 12);
        assert_eq!(backend.read_at(0, 12).unwrap(), b"sealed table");
    }

    #[test]
    fn flush_makes_bytes_visible_on_disk() {
        let dir = tempdir().unwrap();
        let mut backend = table(dir.path());
        backend.append(b"pending").unwrap();
        backend.flush().unwrap();

        let on_disk = std::fs::read(dir.path().join("00000001.ldb")).unwrap();
        assert_eq!(on_disk, b"pending");
    }

    #[test]
    fn truncate_drops_torn_tail() {
        let dir = tempdir().unwrap();
        let mut backend = table(dir.path());
        backend.append(b"complete|torn").unwrap();

        backend.truncate(9).unwrap();
        assert_eq!(backend.size().unwrap(), 9);
        assert_eq!(backend.append(b"next").unwrap(), 9);
        assert_eq!(backend.read_at(0, 13).unwrap(), b"complete|next");

        assert!(matches!(
            backend.truncate(100).unwrap_err(),
            StorageError::TruncateBeyondEnd {
                requested: 100,
                size: 13
            }
        ));
    }
}
