//! WAL Writer
//!
//! Handles appending entries to the WAL file.
//!
//! Appends only ever extend the valid prefix of the log: a torn tail found
//! at open is cut off, and a failed append is rolled back before the next
//! one. If the rollback fails too, the writer refuses further appends.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::config::WalSyncStrategy;
use crate::error::{FenceError, Result};

use super::{Operation, WalEntry, WalRecovery};

/// Writes entries to the WAL file
pub struct WalWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    /// LSN the next entry will get
    next_lsn: u64,
    sync_strategy: WalSyncStrategy,
    unsynced: usize,
    /// Bytes of valid entries in the file
    size: u64,
    /// Set when a failed append could not be rolled back
    poisoned: bool,
}

impl WalWriter {
    /// Open or create a WAL file, continuing after its last valid entry
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let (last_lsn, prefix) = if path.exists() {
            let (result, valid_len) = WalRecovery::valid_prefix(path)?;
            (result.last_lsn, Some((valid_len, result.was_truncated)))
        } else {
            (0, None)
        };

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        if let Some((len, true)) = prefix {
            file.set_len(len)?;
            file.sync_all()?;
            tracing::warn!(path = %path.display(), valid_len = len, "cut torn WAL tail before appending");
        }
        let size = file.seek(SeekFrom::End(0))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            next_lsn: last_lsn + 1,
            sync_strategy,
            unsynced: 0,
            size,
            poisoned: false,
        })
    }

    /// Append an operation, returning its LSN
    pub fn append(&mut self, operation: Operation) -> Result<u64> {
        if self.poisoned {
            return Err(FenceError::WalCorruption(format!(
                "{} has a partial entry that could not be removed",
                self.path.display()
            )));
        }
        let lsn = self.next_lsn;
        let bytes = WalEntry::new(lsn, operation).serialize()?;

        if let Err(e) = self.write_frame(&bytes) {
            self.rollback();
            return Err(e.into());
        }
        self.next_lsn += 1;
        self.size += bytes.len() as u64;
        self.unsynced += 1;

        let due = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.unsynced >= count,
        };
        if due {
            self.sync()?;
        }
        Ok(lsn)
    }

    fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()
    }

    /// Cut the file back to the last complete entry and drop whatever the
    /// buffer still holds
    fn rollback(&mut self) {
        if let Err(e) = self.reset_to(self.size) {
            tracing::error!(path = %self.path.display(), error = %e, "WAL rollback failed, refusing further appends");
            self.poisoned = true;
        } else {
            tracing::warn!(path = %self.path.display(), size = self.size, "rolled back partial WAL entry");
        }
    }

    fn reset_to(&mut self, len: u64) -> io::Result<()> {
        let mut file = self.writer.get_ref().try_clone()?;
        file.set_len(len)?;
        file.seek(SeekFrom::Start(len))?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // Unwritten bytes are discarded, not flushed
        let _ = stale.into_parts();
        Ok(())
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Drop every entry; LSNs restart at 1
    pub fn truncate(&mut self) -> Result<()> {
        self.writer.flush()?;
        let file = self.writer.get_mut();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.sync_all()?;
        self.next_lsn = 1;
        self.size = 0;
        self.unsynced = 0;
        Ok(())
    }

    /// LSN the next appended entry will get
    pub fn current_lsn(&self) -> u64 {
        self.next_lsn
    }

    /// Bytes currently in the log
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
