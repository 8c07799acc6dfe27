//! Master and slave catch-up trackers

use crate::error::Result;
use crate::manager::RedoLogManager;
use crate::rollover::SegmentInfo;

use super::{
    compute_backlog, MasterCatchUpStatus, OperatingMode, ReplicationPosition, SlaveCatchUpStatus,
};

// =============================================================================
// Master
// =============================================================================

/// Tracks the master's operating mode and the backlog owed to its slave
///
/// ```text
/// Invalid ──establish()──▶ Normal ⇄ Catchup
///     │
///     └──establish(no slave)──▶ Slaveless
/// ```
#[derive(Debug)]
pub struct MasterTracker {
    mode: OperatingMode,
    role_established: bool,
    slave_configured: bool,
    /// Last position the slave acknowledged
    slave_position: Option<ReplicationPosition>,
    status: Option<MasterCatchUpStatus>,
}

impl Default for MasterTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MasterTracker {
    pub fn new() -> Self {
        Self {
            mode: OperatingMode::Invalid,
            role_established: false,
            slave_configured: false,
            slave_position: None,
            status: None,
        }
    }

    /// Establish this server as master, with or without a slave
    pub fn establish(&mut self, slave_configured: bool) {
        self.role_established = true;
        self.slave_configured = slave_configured;
        if !slave_configured {
            self.slave_position = None;
            self.status = None;
        }
        let mode = if slave_configured {
            OperatingMode::Normal
        } else {
            OperatingMode::Slaveless
        };
        self.set_mode(mode);
    }

    /// Record the position the slave reports having applied
    ///
    /// Older positions than the one already known are ignored.
    pub fn slave_acknowledged(&mut self, position: ReplicationPosition) {
        if let Some(known) = &self.slave_position {
            if position.cmp_position(known).is_lt() {
                tracing::debug!("Ignoring stale slave position {} (have {})", position, known);
                return;
            }
        }
        self.slave_position = Some(position);
    }

    /// Recompute the mode against the manager's current segments
    pub fn refresh(&mut self, redo_log: &RedoLogManager) -> OperatingMode {
        match redo_log.segments() {
            Ok(segments) => self.refresh_with(&segments),
            Err(e) => self.invalidate(&e.to_string()),
        }
    }

    /// Recompute the mode against an explicit segment snapshot
    pub fn refresh_with(&mut self, segments: &[SegmentInfo]) -> OperatingMode {
        if !self.role_established {
            return self.mode;
        }
        if !self.slave_configured {
            self.set_mode(OperatingMode::Slaveless);
            return self.mode;
        }

        let position = match &self.slave_position {
            Some(position) => *position,
            None => {
                self.status = None;
                self.set_mode(OperatingMode::Normal);
                return self.mode;
            }
        };

        match compute_backlog(segments, &position) {
            Ok(backlog) => {
                let status = backlog.master_view();
                if status.is_caught_up() {
                    self.status = None;
                    self.set_mode(OperatingMode::Normal);
                } else {
                    self.status = Some(status);
                    self.set_mode(OperatingMode::Catchup);
                }
            }
            Err(e) => {
                self.invalidate(&e.to_string());
            }
        }
        self.mode
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    /// Backlog being shipped; `None` unless in catch-up
    pub fn status(&self) -> Option<MasterCatchUpStatus> {
        self.status
    }

    pub fn slave_position(&self) -> Option<ReplicationPosition> {
        self.slave_position
    }

    fn invalidate(&mut self, reason: &str) -> OperatingMode {
        tracing::warn!("Replication catch-up status unavailable: {}", reason);
        self.status = None;
        self.set_mode(OperatingMode::Invalid);
        self.mode
    }

    fn set_mode(&mut self, mode: OperatingMode) {
        if self.mode != mode {
            tracing::info!("Replication operating mode: {} -> {}", self.mode, mode);
            self.mode = mode;
        }
    }
}

// =============================================================================
// Slave
// =============================================================================

/// Tracks what a slave has applied
#[derive(Debug, Default)]
pub struct SlaveTracker {
    applied: Option<ReplicationPosition>,
}

impl SlaveTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a previously persisted position
    pub fn resume_from(position: ReplicationPosition) -> Self {
        Self {
            applied: Some(position),
        }
    }

    /// Record progress; returns false (and keeps the old position) when
    /// `position` is behind what was already applied
    pub fn record_applied(&mut self, position: ReplicationPosition) -> bool {
        if let Some(applied) = &self.applied {
            if position.cmp_position(applied).is_lt() {
                tracing::warn!(
                    "Ignoring applied position {} behind current {}",
                    position,
                    applied
                );
                return false;
            }
        }
        self.applied = Some(position);
        true
    }

    pub fn applied(&self) -> Option<ReplicationPosition> {
        self.applied
    }

    /// Remaining work against the master's `segments`
    ///
    /// A slave that has applied nothing owes every retained segment.
    pub fn status(&self, segments: &[SegmentInfo]) -> Result<SlaveCatchUpStatus> {
        let position = match (&self.applied, segments.first()) {
            (Some(applied), _) => *applied,
            (None, Some(first)) => ReplicationPosition::start_of(first.seq),
            (None, None) => return Ok(SlaveCatchUpStatus::default()),
        };
        compute_backlog(segments, &position)
    }
}
