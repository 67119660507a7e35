//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};

/// A heap-backed storage backend that remembers what was synced.
///
/// Used by tests that exercise the segment table format without touching
/// the file system. [`InMemoryBackend::lose_unsynced`] drops everything
/// written since the last `sync`, the way a power cut would.
///
/// # Example
///
/// ```rust
/// use rpl_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// backend.append(b"abc").unwrap();
/// backend.sync().unwrap();
/// backend.append(b"def").unwrap();
///
/// backend.lose_unsynced();
/// assert_eq!(backend.data(), b"abc");
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    data: Vec<u8>,
    synced_len: usize,
    syncs: u64,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend holding pre-existing, already durable bytes.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            synced_len: data.len(),
            data,
            syncs: 0,
        }
    }

    /// Returns a copy of all bytes in the backend.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.clone()
    }

    /// Returns how many times `sync` was called.
    #[must_use]
    pub fn sync_count(&self) -> u64 {
        self.syncs
    }

    /// Bytes appended since the last `sync`.
    #[must_use]
    pub fn unsynced_len(&self) -> usize {
        self.data.len().saturating_sub(self.synced_len)
    }

    /// Discards every byte appended since the last `sync`.
    pub fn lose_unsynced(&mut self) {
        self.data.truncate(self.synced_len);
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = self.data.len() as u64;
        let end = offset.saturating_add(len as u64);
        if end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        Ok(self.data[offset as usize..end as usize].to_vec())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.synced_len = self.data.len();
        self.syncs += 1;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let size = self.data.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }

        // truncation is synced, matching the file backend
        self.data.truncate(new_size as usize);
        self.synced_len = self.data.len();
        Ok(())
    }
}
