//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level byte store holding one segment table.
///
/// Backends are **opaque byte stores**. The segment layer decides what the
/// bytes mean; a backend only guarantees that appended bytes can be read
/// back at the offset `append` returned.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `sync` makes every appended byte durable
/// - Backends must be `Send + Sync` so sealed tables can be shared across threads
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range is not
    /// fully inside the store, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the store and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the OS.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes, which is where the next `append` writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Drops every byte after `new_size`.
    ///
    /// Used when an uncleanly closed table is cut back to its last complete record.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is larger than the current size or the
    /// truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Reads a big-endian `u32` at `offset`.
    ///
    /// # Errors
    ///
    /// Same as [`StorageBackend::read_at`].
    fn read_u32_at(&self, offset: u64) -> StorageResult<u32> {
        let bytes = self.read_at(offset, 4)?;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&bytes);
        Ok(u32::from_be_bytes(buf))
    }

    /// Reads a big-endian `u64` at `offset`.
    ///
    /// # Errors
    ///
    /// Same as [`StorageBackend::read_at`].
    fn read_u64_at(&self, offset: u64) -> StorageResult<u64> {
        let bytes = self.read_at(offset, 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes);
        Ok(u64::from_be_bytes(buf))
    }
}
