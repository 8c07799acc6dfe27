//! Segment Reader
//!
//! Reads records back from a segment in append order.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{RedoError, Result};

use super::{
    decode_record_body, FileHeader, LogRecord, HEADER_SIZE, MAX_RECORD_SIZE, RECORD_PREFIX_SIZE,
};

/// Reads records from one segment file
pub struct LogReader {
    file: BufReader<File>,
    path: PathBuf,
    header: FileHeader,
    /// Offset just past the last successfully read record
    position: u64,
    file_len: u64,
    /// Whether the last bad record ran to the end of the file
    torn_tail: bool,
}

impl LogReader {
    /// Open a segment for reading and validate its header
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let header = FileHeader::read(&mut file)?;

        Ok(Self {
            file: BufReader::new(file),
            path: path.to_path_buf(),
            header,
            position: HEADER_SIZE,
            file_len,
            torn_tail: false,
        })
    }

    /// Start reading at `offset` instead of the first record
    ///
    /// `offset` must be a record boundary (e.g. a replication position).
    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        if offset < HEADER_SIZE || offset > self.file_len {
            return Err(RedoError::InvalidState(format!(
                "offset {} outside records of {} ({} bytes)",
                offset,
                self.path.display(),
                self.file_len
            )));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.position = offset;
        Ok(())
    }

    /// Read the next record
    ///
    /// Returns `Ok(None)` at a clean end of file. A short or CRC-failing
    /// record is a `Corruption` error and leaves `position()` at the start
    /// of the bad record.
    pub fn next_record(&mut self) -> Result<Option<LogRecord>> {
        self.torn_tail = false;
        if self.position >= self.file_len {
            return Ok(None);
        }

        let remaining = self.file_len - self.position;
        if remaining < RECORD_PREFIX_SIZE as u64 {
            self.torn_tail = true;
            return Err(RedoError::Corruption(format!(
                "truncated record prefix at offset {} ({} bytes left)",
                self.position, remaining
            )));
        }

        let mut prefix = [0u8; RECORD_PREFIX_SIZE];
        self.file.read_exact(&mut prefix)?;
        let body_len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
        let stored_crc = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
        let claimed_len = RECORD_PREFIX_SIZE as u64 + body_len as u64;
        self.torn_tail = claimed_len >= remaining;

        if body_len > MAX_RECORD_SIZE {
            self.rewind()?;
            return Err(RedoError::Corruption(format!(
                "record length {} at offset {} exceeds maximum",
                body_len, self.position
            )));
        }

        if remaining < claimed_len {
            self.rewind()?;
            return Err(RedoError::Corruption(format!(
                "truncated record at offset {}: need {} bytes, {} left",
                self.position,
                claimed_len,
                remaining
            )));
        }

        let mut body = vec![0u8; body_len as usize];
        self.file.read_exact(&mut body)?;

        let computed_crc = crc32fast::hash(&body);
        if computed_crc != stored_crc {
            self.rewind()?;
            return Err(RedoError::Corruption(format!(
                "record CRC mismatch at offset {}: stored {:08x}, computed {:08x}",
                self.position, stored_crc, computed_crc
            )));
        }

        let op = match decode_record_body(&body) {
            Ok(op) => op,
            Err(e) => {
                // The CRC matched, so the record was written whole
                self.torn_tail = false;
                self.rewind()?;
                return Err(e);
            }
        };

        let offset = self.position;
        self.torn_tail = false;
        self.position += claimed_len;

        Ok(Some(LogRecord { op, offset, len: claimed_len }))
    }

    /// Iterate over records until end of file or the first error
    pub fn records(self) -> LogIterator {
        LogIterator {
            reader: self,
            done: false,
        }
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset just past the last good record
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Whether the last bad record ran up to (or past) the end of the file
    ///
    /// That is how an append interrupted by a crash looks. A bad record
    /// followed by more bytes is not a torn tail.
    pub fn at_torn_tail(&self) -> bool {
        self.torn_tail
    }

    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    fn rewind(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(self.position))?;
        Ok(())
    }
}

/// Iterator over segment records
pub struct LogIterator {
    reader: LogReader,
    done: bool,
}

impl LogIterator {
    /// The underlying reader (e.g. for `position()` after an error)
    pub fn reader(&self) -> &LogReader {
        &self.reader
    }
}

impl Iterator for LogIterator {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
