//! The persisted commit cursor.

use crate::error::{RplError, RplResult};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

pub(crate) const COMMIT_FILE: &str = "commit.log";

/// An 8-byte big-endian ID rewritten in place on every update.
#[derive(Debug)]
pub(crate) struct CommitLog {
    file: File,
    id: u64,
    sync: bool,
}

impl CommitLog {
    pub(crate) fn open(path: &Path, sync: bool) -> RplResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let len = file.metadata()?.len();
        let id = match len {
            0 => 0,
            8 => {
                let mut buf = [0u8; 8];
                file.read_exact(&mut buf)?;
                u64::from_be_bytes(buf)
            }
            _ => {
                return Err(RplError::corrupted(format!(
                    "commit file {} has {len} bytes, expected 8",
                    path.display()
                )))
            }
        };

        Ok(Self { file, id, sync })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn update(&mut self, id: u64) -> RplResult<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&id.to_be_bytes())?;
        if self.sync {
            self.file.sync_data()?;
        }
        self.id = id;
        Ok(())
    }
}
