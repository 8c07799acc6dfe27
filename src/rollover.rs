//! Segment Rollover Naming
//!
//! Archived segments embed their sequence number in the file name so a
//! directory listing sorts into replay order without opening any file:
//!
//! ```text
//! redo-{create_millis}-seq{N}.log
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

const ARCHIVE_PREFIX: &str = "redo-";
const SEQ_MARKER: &str = "-seq";
const LOG_SUFFIX: &str = ".log";

/// One segment file, archived or active
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub seq: u64,
    pub path: PathBuf,
    /// File length in bytes
    pub len: u64,
    /// True for the segment currently being written
    pub active: bool,
}

/// File name for the archive of segment `seq` created at `create_time`
pub fn archive_file_name(create_time: i64, seq: u64) -> String {
    format!("{}{}{}{}{}", ARCHIVE_PREFIX, create_time, SEQ_MARKER, seq, LOG_SUFFIX)
}

/// Parse the sequence number out of an archive file name
///
/// "redo-1700000000000-seq42.log" → Some(42)
pub fn parse_archive_seq(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_prefix(ARCHIVE_PREFIX)?.strip_suffix(LOG_SUFFIX)?;
    let idx = stem.rfind(SEQ_MARKER)?;
    let digits = &stem[idx + SEQ_MARKER.len()..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Archived segments with `from_seq <= seq <= to_seq`, sorted by sequence
///
/// A missing directory has no archives.
pub fn archive_logs(dir: &Path, from_seq: u64, to_seq: u64) -> Result<Vec<SegmentInfo>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut segments = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(seq) = parse_archive_seq(&path) {
            if seq < from_seq || seq > to_seq {
                continue;
            }
            let len = entry.metadata()?.len();
            segments.push(SegmentInfo {
                seq,
                path,
                len,
                active: false,
            });
        }
    }

    segments.sort_by_key(|s| s.seq);
    Ok(segments)
}

/// Every archived segment, sorted by sequence
pub fn all_archive_logs(dir: &Path) -> Result<Vec<SegmentInfo>> {
    archive_logs(dir, 0, u64::MAX)
}

/// Highest archived sequence number, if any
pub fn max_archived_seq(dir: &Path) -> Result<Option<u64>> {
    Ok(all_archive_logs(dir)?.last().map(|s| s.seq))
}
