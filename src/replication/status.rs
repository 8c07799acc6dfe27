//! Catch-up status types

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::txn::CommitId;
use crate::wal::HEADER_SIZE;

/// What the master is currently doing for replication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatingMode {
    /// Role not established, or the backlog could not be computed
    Invalid,
    /// A slave is configured and not behind
    Normal,
    /// No slave is configured
    Slaveless,
    /// A slave is behind and backlog is being shipped
    Catchup,
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperatingMode::Invalid => "invalid",
            OperatingMode::Normal => "normal",
            OperatingMode::Slaveless => "slaveless",
            OperatingMode::Catchup => "catchup",
        };
        f.write_str(name)
    }
}

/// Backlog the master still has to ship to a lagging slave
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterCatchUpStatus {
    pub remaining_files: u64,
    pub remaining_bytes: u64,
}

impl MasterCatchUpStatus {
    pub fn is_caught_up(&self) -> bool {
        self.remaining_files == 0 && self.remaining_bytes == 0
    }
}

/// Replay work a slave has left before it matches the master
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveCatchUpStatus {
    /// Commit records not yet applied
    pub remaining_ops: u64,
    pub remaining_files: u64,
    pub remaining_bytes: u64,
}

impl SlaveCatchUpStatus {
    pub fn is_caught_up(&self) -> bool {
        self.remaining_ops == 0 && self.remaining_files == 0 && self.remaining_bytes == 0
    }

    /// The part of the backlog the master reports
    pub fn master_view(&self) -> MasterCatchUpStatus {
        MasterCatchUpStatus {
            remaining_files: self.remaining_files,
            remaining_bytes: self.remaining_bytes,
        }
    }
}

/// Point in the master's log a slave has applied up to
///
/// `offset` is the byte position in segment `seq` just past the last
/// applied record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationPosition {
    pub seq: u64,
    pub offset: u64,
    /// Last commit applied at this position, if any
    pub commit: Option<CommitId>,
}

impl ReplicationPosition {
    pub fn new(seq: u64, offset: u64, commit: Option<CommitId>) -> Self {
        Self { seq, offset, commit }
    }

    /// Nothing applied yet from segment `seq`
    pub fn start_of(seq: u64) -> Self {
        Self::new(seq, HEADER_SIZE, None)
    }

    /// Compare log positions, ignoring the commit
    pub fn cmp_position(&self, other: &Self) -> Ordering {
        (self.seq, self.offset).cmp(&(other.seq, other.offset))
    }
}

impl fmt::Display for ReplicationPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq {} @ {}", self.seq, self.offset)?;
        if let Some(commit) = &self.commit {
            write!(f, " (commit {})", commit)?;
        }
        Ok(())
    }
}
