//! Backlog computation
//!
//! ```text
//!   seg N (position)         seg N+1            seg N+2 (active)
//! ┌──────────┬─────────┐  ┌─────────────┐  ┌───────────────┐
//! │ applied  │ pending │  │   pending   │  │    pending    │
//! └──────────┴─────────┘  └─────────────┘  └───────────────┘
//!            ▲ offset
//! ```

use crate::error::{RedoError, Result};
use crate::op::OpKind;
use crate::rollover::SegmentInfo;
use crate::wal::{LogReader, HEADER_SIZE};

use super::{ReplicationPosition, SlaveCatchUpStatus};

/// Work between `position` and the end of `segments`
///
/// `segments` is the master's retained archives plus the active segment,
/// in sequence order. A position naming a segment that is no longer
/// retained, or an offset past its end, is a `Replication` error.
pub fn compute_backlog(
    segments: &[SegmentInfo],
    position: &ReplicationPosition,
) -> Result<SlaveCatchUpStatus> {
    let idx = segments
        .iter()
        .position(|s| s.seq == position.seq)
        .ok_or_else(|| {
            let retained = match (segments.first(), segments.last()) {
                (Some(first), Some(last)) => format!("{}..={}", first.seq, last.seq),
                _ => "none".to_string(),
            };
            RedoError::Replication(format!(
                "segment seq {} is not retained (retained: {})",
                position.seq, retained
            ))
        })?;

    let current = &segments[idx];
    let offset = position.offset.max(HEADER_SIZE);
    if offset > current.len {
        return Err(RedoError::Replication(format!(
            "position {} is past the end of segment seq {} ({} bytes)",
            position, current.seq, current.len
        )));
    }

    let mut status = SlaveCatchUpStatus::default();

    let tail = current.len - offset;
    if tail > 0 {
        status.remaining_files += 1;
        status.remaining_bytes += tail;
        status.remaining_ops += count_commits(current, offset)?;
    }

    // Header bytes are not backlog; a segment holding only a header is not owed
    for segment in &segments[idx + 1..] {
        let records = segment.len.saturating_sub(HEADER_SIZE);
        if records == 0 {
            continue;
        }
        status.remaining_files += 1;
        status.remaining_bytes += records;
        status.remaining_ops += count_commits(segment, HEADER_SIZE)?;
    }

    Ok(status)
}

/// Commit records in `segment` from `offset` up to its recorded length
///
/// The active segment may end in a record that is still being written;
/// a bad record there ends the count. Archived segments must read cleanly.
fn count_commits(segment: &SegmentInfo, offset: u64) -> Result<u64> {
    let replication_err =
        |e: RedoError| RedoError::Replication(format!("{}: {}", segment.path.display(), e));

    let mut reader = LogReader::open(&segment.path).map_err(replication_err)?;
    reader.seek_to(offset).map_err(replication_err)?;

    let mut commits = 0;
    loop {
        match reader.next_record() {
            Ok(Some(record)) => {
                if record.end_offset() > segment.len {
                    break;
                }
                if record.op.kind() == OpKind::CommitTxn {
                    commits += 1;
                }
            }
            Ok(None) => break,
            Err(RedoError::Corruption(msg)) if segment.active => {
                tracing::debug!("Stopping backlog count at torn tail: {}", msg);
                break;
            }
            Err(e) => return Err(replication_err(e)),
        }
    }
    Ok(commits)
}
