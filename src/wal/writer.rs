//! Segment Writer
//!
//! Appends records to the active segment.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::config::SyncStrategy;
use crate::error::{RedoError, Result};
use crate::op::RedoableOp;

use super::{encode_record, FileHeader, HEADER_SIZE};

/// Writes records to one segment file
///
/// The header's `open` flag is set for as long as a writer owns the
/// file. Only `close()` clears it, so a writer that is dropped (or a
/// process that dies) leaves the segment marked as uncleanly shut down.
pub struct LogWriter {
    file: File,
    path: PathBuf,
    header: FileHeader,
    /// Current file length
    size: u64,
    sync_strategy: SyncStrategy,
    /// Records written since the last fsync
    unsynced: usize,
    /// Records appended through this writer
    records_written: u64,
}

impl LogWriter {
    /// Create a fresh segment at `path`
    ///
    /// The header is written to a temp file and renamed into place, so a
    /// crash never leaves a segment with a torn header.
    pub fn create(
        path: &Path,
        sequence: u64,
        create_time: i64,
        sync_strategy: SyncStrategy,
    ) -> Result<Self> {
        if path.exists() {
            return Err(RedoError::InvalidState(format!(
                "segment {} already exists",
                path.display()
            )));
        }

        let header = FileHeader::new(sequence, create_time);
        let tmp_path = Self::temp_path(path);
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&header.encode())?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        sync_parent_dir(path)?;

        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        file.seek(SeekFrom::End(0))?;

        tracing::debug!("Created segment {} (seq {})", path.display(), sequence);

        Ok(Self {
            file,
            path: path.to_path_buf(),
            header,
            size: HEADER_SIZE,
            sync_strategy,
            unsynced: 0,
            records_written: 0,
        })
    }

    /// Reopen an existing segment for appending
    ///
    /// Marks the header open again. Any torn tail must already have been
    /// truncated away by the caller.
    pub fn open_existing(path: &Path, sync_strategy: SyncStrategy) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut header = FileHeader::read(&mut file)?;

        header.open = true;
        header.write_to(&mut file)?;
        file.sync_all()?;

        let size = file.seek(SeekFrom::End(0))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            header,
            size,
            sync_strategy,
            unsynced: 0,
            records_written: 0,
        })
    }

    /// Append one record; returns its file offset
    pub fn append(&mut self, op: &RedoableOp) -> Result<u64> {
        let record = encode_record(op)?;
        let offset = self.size;

        self.file.write_all(&record)?;
        self.size += record.len() as u64;
        self.records_written += 1;
        self.unsynced += 1;

        if self.header.first_op_tstamp == 0 {
            self.header.first_op_tstamp = op.timestamp();
        }
        if op.timestamp() > self.header.last_op_tstamp {
            self.header.last_op_tstamp = op.timestamp();
        }

        let should_sync = match self.sync_strategy {
            SyncStrategy::EveryWrite => true,
            SyncStrategy::EveryNEntries { count } => self.unsynced >= count,
        };
        if should_sync {
            self.sync()?;
        }

        Ok(offset)
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Flush, clear the open flag and release the file
    pub fn close(mut self) -> Result<FileHeader> {
        self.file.flush()?;
        self.header.open = false;
        self.header.write_to(&mut self.file)?;
        self.file.sync_all()?;

        tracing::debug!(
            "Closed segment {} (seq {}, {} bytes)",
            self.path.display(),
            self.header.sequence,
            self.size
        );

        Ok(self.header)
    }

    /// Record that the file was renamed while this writer held it open
    pub(crate) fn relocated(&mut self, path: &Path) {
        self.path = path.to_path_buf();
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sequence(&self) -> u64 {
        self.header.sequence
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Current file length in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// True when the segment holds no records at all
    pub fn is_empty(&self) -> bool {
        self.size <= HEADER_SIZE
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    fn temp_path(path: &Path) -> PathBuf {
        let mut name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        path.with_file_name(name)
    }
}

/// Clear the open flag of a segment no writer owns any more
///
/// Used on archived segments that a crash left marked open. Any torn tail
/// must already have been truncated.
pub(crate) fn seal_segment(path: &Path) -> Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let mut header = FileHeader::read(&mut file)?;
    if !header.open {
        return Ok(());
    }
    header.open = false;
    header.write_to(&mut file)?;
    file.sync_all()?;
    tracing::debug!("Sealed segment {} (seq {})", path.display(), header.sequence);
    Ok(())
}

/// Make a rename or create in `path`'s directory durable
pub(crate) fn sync_parent_dir(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            let dir = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            File::open(dir)?.sync_all()?;
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
