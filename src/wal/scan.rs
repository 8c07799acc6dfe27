//! Segment Scanning
//!
//! Whole-segment passes used by crash recovery and tooling.

use std::fs::OpenOptions;
use std::path::Path;

use crate::error::{RedoError, Result};

use super::{FileHeader, LogReader, LogRecord};

/// Handles scanning (and, for the active segment, repairing) a segment
pub struct LogScanner;

/// What a scan does when it reaches a record it cannot read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailPolicy {
    /// Stop there and report the rest of the file as junk
    Report,

    /// Stop only at a torn final record of a segment whose header is still
    /// open; any other bad record is a `Corruption` error
    ///
    /// A closed segment was synced in full before its header was cleared,
    /// so it can have no torn tail.
    TornTailOnly,
}

/// Result of a scan
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub header: FileHeader,

    /// Number of records read successfully
    pub records: u64,

    /// Offset just past the last good record
    pub last_good_offset: u64,

    /// Bytes after the last good record (torn or corrupt tail)
    pub junk_bytes: u64,

    /// Whether the junk tail was cut off the file
    pub was_truncated: bool,
}

impl LogScanner {
    /// Read every good record of a segment without modifying it
    ///
    /// Reading stops at the first short or corrupt record; everything
    /// from there on is reported as junk.
    pub fn scan(path: &Path) -> Result<(Vec<LogRecord>, ScanResult)> {
        Self::scan_with(path, TailPolicy::Report)
    }

    pub fn scan_with(path: &Path, policy: TailPolicy) -> Result<(Vec<LogRecord>, ScanResult)> {
        let mut records = Vec::new();
        let result = Self::walk(path, policy, |record| {
            records.push(record);
            Ok(())
        })?;
        Ok((records, result))
    }

    /// Stream every good record to `visit`, then report the scan stats
    pub fn walk<F>(path: &Path, policy: TailPolicy, mut visit: F) -> Result<ScanResult>
    where
        F: FnMut(LogRecord) -> Result<()>,
    {
        let mut reader = LogReader::open(path)?;
        let mut count = 0u64;

        loop {
            match reader.next_record() {
                Ok(Some(record)) => {
                    count += 1;
                    visit(record)?;
                }
                Ok(None) => break,
                Err(RedoError::Corruption(msg)) => {
                    let tolerated = match policy {
                        TailPolicy::Report => true,
                        TailPolicy::TornTailOnly => reader.header().open && reader.at_torn_tail(),
                    };
                    if !tolerated {
                        return Err(RedoError::Corruption(format!("{}: {}", path.display(), msg)));
                    }
                    tracing::warn!("Stopped reading {}: {}", path.display(), msg);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        let last_good_offset = reader.position();
        Ok(ScanResult {
            header: reader.header().clone(),
            records: count,
            last_good_offset,
            junk_bytes: reader.file_len() - last_good_offset,
            was_truncated: false,
        })
    }

    /// Scan a segment, then cut any junk tail off the file
    ///
    /// Only for the active segment, before a writer reopens it. Anything
    /// but a torn tail is a `Corruption` error and the file is left alone.
    pub fn recover(path: &Path) -> Result<(Vec<LogRecord>, ScanResult)> {
        let (records, mut result) = Self::scan_with(path, TailPolicy::TornTailOnly)?;
        Self::truncate_junk(path, &mut result)?;
        Ok((records, result))
    }

    /// Cut the junk tail reported by a previous scan
    pub fn truncate_junk(path: &Path, result: &mut ScanResult) -> Result<()> {
        if result.junk_bytes == 0 {
            return Ok(());
        }

        tracing::warn!(
            "There were {} bytes of junk data at the end of {}; truncating to {} bytes",
            result.junk_bytes,
            path.display(),
            result.last_good_offset
        );

        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(result.last_good_offset)?;
        file.sync_all()?;
        result.was_truncated = true;
        Ok(())
    }

    /// Verify integrity of a segment without modifying it
    pub fn verify(path: &Path) -> Result<ScanResult> {
        Self::walk(path, TailPolicy::Report, |_| Ok(()))
    }
}
