//! Log record and its binary encoding.
//!
//! ```text
//! | id (8) | create_time (4) | compression (1) | data_len (4) | data (N) |
//! ```
//!
//! All integers are big-endian. The fixed 17-byte head is decoded first so a
//! reader can size the payload buffer before reading it.

use crate::error::{RplError, RplResult};
use std::borrow::Cow;
use std::io::{self, Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

/// Size of the fixed record head.
pub const LOG_HEAD_SIZE: usize = 17;

/// Reserved "no log" ID; also the ID of a segment's split record.
pub const INVALID_LOG_ID: u64 = 0;

/// `compression` value for a plain payload.
pub const COMPRESSION_NONE: u8 = 0;

/// `compression` value for a snappy-compressed payload.
pub const COMPRESSION_SNAPPY: u8 = 1;

/// Current wall-clock time in seconds since the epoch.
#[must_use]
pub fn unix_now() -> u32 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    u32::try_from(secs).unwrap_or(u32::MAX)
}

/// One entry of the replication log.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Log {
    /// Log ID, non-zero and strictly increasing within a store.
    pub id: u64,
    /// Seconds since the epoch when the record was created.
    pub create_time: u32,
    /// [`COMPRESSION_NONE`] or [`COMPRESSION_SNAPPY`].
    pub compression: u8,
    /// Opaque payload.
    pub data: Vec<u8>,
}

/// The fixed-size head of an encoded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHead {
    /// Log ID.
    pub id: u64,
    /// Creation time.
    pub create_time: u32,
    /// Compression flag.
    pub compression: u8,
    /// Payload length in bytes.
    pub data_len: u32,
}

impl LogHead {
    /// Parses a head from its 17 encoded bytes.
    #[must_use]
    pub fn from_bytes(buf: &[u8; LOG_HEAD_SIZE]) -> Self {
        let mut id = [0u8; 8];
        id.copy_from_slice(&buf[0..8]);
        let mut create_time = [0u8; 4];
        create_time.copy_from_slice(&buf[8..12]);
        let mut data_len = [0u8; 4];
        data_len.copy_from_slice(&buf[13..17]);

        Self {
            id: u64::from_be_bytes(id),
            create_time: u32::from_be_bytes(create_time),
            compression: buf[12],
            data_len: u32::from_be_bytes(data_len),
        }
    }

    /// Parses a head from the start of `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`RplError::ShortRead`] if `buf` is shorter than the head.
    pub fn parse(buf: &[u8]) -> RplResult<Self> {
        let head: &[u8; LOG_HEAD_SIZE] = buf
            .get(..LOG_HEAD_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or(RplError::ShortRead {
                needed: LOG_HEAD_SIZE,
            })?;
        Ok(Self::from_bytes(head))
    }

    /// Encodes the head.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; LOG_HEAD_SIZE] {
        let mut buf = [0u8; LOG_HEAD_SIZE];
        buf[0..8].copy_from_slice(&self.id.to_be_bytes());
        buf[8..12].copy_from_slice(&self.create_time.to_be_bytes());
        buf[12] = self.compression;
        buf[13..17].copy_from_slice(&self.data_len.to_be_bytes());
        buf
    }

    /// Size of the whole encoded record (head plus payload).
    #[must_use]
    pub fn record_size(&self) -> u64 {
        LOG_HEAD_SIZE as u64 + u64::from(self.data_len)
    }
}

impl Log {
    /// Creates an uncompressed record stamped with the current time.
    #[must_use]
    pub fn new(id: u64, data: Vec<u8>) -> Self {
        Self {
            id,
            create_time: unix_now(),
            compression: COMPRESSION_NONE,
            data,
        }
    }

    /// Size of the fixed head.
    #[must_use]
    pub const fn head_size() -> usize {
        LOG_HEAD_SIZE
    }

    /// Size of the encoded record.
    #[must_use]
    pub fn size(&self) -> usize {
        LOG_HEAD_SIZE + self.data.len()
    }

    /// Builds the head for this record.
    ///
    /// # Errors
    ///
    /// Returns [`RplError::InvalidArgument`] if the payload does not fit a 32-bit length.
    pub fn head(&self) -> RplResult<LogHead> {
        let data_len = u32::try_from(self.data.len()).map_err(|_| {
            RplError::invalid_argument(format!(
                "log payload too large: {} bytes exceeds {} bytes",
                self.data.len(),
                u32::MAX
            ))
        })?;

        Ok(LogHead {
            id: self.id,
            create_time: self.create_time,
            compression: self.compression,
            data_len,
        })
    }

    /// Writes the encoded record to `w`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is too large or the write fails.
    pub fn encode<W: Write>(&self, w: &mut W) -> RplResult<()> {
        let head = self.head()?;
        w.write_all(&head.to_bytes())?;
        w.write_all(&self.data)?;
        Ok(())
    }

    /// Reads just the 17-byte head, leaving the payload unread.
    ///
    /// # Errors
    ///
    /// Returns [`RplError::ShortRead`] if the reader ends inside the head.
    pub fn decode_head<R: Read>(r: &mut R) -> RplResult<LogHead> {
        let mut buf = [0u8; LOG_HEAD_SIZE];
        read_full(r, &mut buf)?;
        Ok(LogHead::from_bytes(&buf))
    }

    /// Reads one full record.
    ///
    /// # Errors
    ///
    /// Returns [`RplError::ShortRead`] if fewer bytes are available than the
    /// head declares; the payload is never silently truncated.
    pub fn decode<R: Read>(r: &mut R) -> RplResult<Self> {
        let head = Self::decode_head(r)?;
        let mut data = vec![0u8; head.data_len as usize];
        read_full(r, &mut data)?;

        Ok(Self {
            id: head.id,
            create_time: head.create_time,
            compression: head.compression,
            data,
        })
    }

    /// Encodes the record into a new buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is too large.
    pub fn marshal(&self) -> RplResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Decodes a record that occupies exactly `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`RplError::ShortRead`] for truncated input and
    /// [`RplError::Corrupted`] for trailing bytes.
    pub fn unmarshal(bytes: &[u8]) -> RplResult<Self> {
        let mut cursor = bytes;
        let log = Self::decode(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(RplError::corrupted(format!(
                "{} trailing bytes after log {}",
                cursor.len(),
                log.id
            )));
        }
        Ok(log)
    }

    /// Returns true if the payload is snappy-compressed.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.compression == COMPRESSION_SNAPPY
    }

    /// Returns the payload as the producer handed it to the driver.
    ///
    /// Stores never decompress; consumers call this.
    ///
    /// # Errors
    ///
    /// Returns [`RplError::Compression`] if a compressed payload is invalid.
    pub fn uncompressed_data(&self) -> RplResult<Cow<'_, [u8]>> {
        if self.is_compressed() {
            let data = snap::raw::Decoder::new().decompress_vec(&self.data)?;
            Ok(Cow::Owned(data))
        } else {
            Ok(Cow::Borrowed(self.data.as_slice()))
        }
    }
}

fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> RplResult<()> {
    r.read_exact(buf).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            RplError::ShortRead { needed: buf.len() }
        } else {
            RplError::Io(err)
        }
    })
}
