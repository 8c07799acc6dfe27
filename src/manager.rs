//! Redo Log Manager
//!
//! Owns the active segment and the archive, and coordinates everything
//! that touches them.
//!
//! ## Responsibilities
//! - Allocate transaction ids
//! - Durably append op, commit and abort records
//! - Roll the active segment over into the archive
//! - Run crash recovery on startup after an unclean shutdown
//! - Stop serving after any failure that leaves the log behind the mailbox

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::config::RedoConfig;
use crate::error::{RedoError, Result};
use crate::op::{OpState, RedoableOp};
use crate::replay::{RecoveryReport, RedoPlayer, SerialExecutor};
use crate::rollover::{self, SegmentInfo};
use crate::store::MailboxStore;
use crate::txn::{CommitId, TransactionId, TxnIdGenerator};
use crate::wal::{seal_segment, sync_parent_dir, FileHeader, LogScanner, LogWriter};

/// Single-writer redo log
///
/// ## Concurrency Model
///
/// Everything that allocates a transaction id, writes a record or
/// changes the sequence number runs under one `state` lock, so ids,
/// records and sequence numbers can never be duplicated or reordered
/// relative to each other. Callers from many protocol handlers may block
/// briefly on the lock; appends themselves are never cancelled.
///
/// `in_crash_recovery` and `halted` are atomics so other components can
/// poll them without taking the lock.
pub struct RedoLogManager {
    /// Manager configuration
    config: RedoConfig,

    /// Append lock and everything it protects
    state: Mutex<LogState>,

    /// Set while startup replay is running
    in_crash_recovery: AtomicBool,

    /// Set after a fatal append/rollover failure; never cleared
    halted: AtomicBool,
}

struct LogState {
    /// Writer for the active segment; `None` when stopped or halted
    writer: Option<LogWriter>,

    /// Sequence number of the active segment
    sequence: u64,

    txn_ids: TxnIdGenerator,

    /// Logged ops with no commit/abort yet, carried into new segments
    active_ops: BTreeMap<TransactionId, RedoableOp>,

    /// Whether the active segment holds records not yet archived
    dirty: bool,

    last_commit: Option<CommitId>,
}

impl RedoLogManager {
    /// Create a manager; nothing is opened until `start()`
    pub fn new(config: RedoConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            state: Mutex::new(LogState {
                writer: None,
                sequence: 0,
                txn_ids: TxnIdGenerator::new(now_secs()),
                active_ops: BTreeMap::new(),
                dirty: false,
                last_commit: None,
            }),
            in_crash_recovery: AtomicBool::new(false),
            halted: AtomicBool::new(false),
        })
    }

    /// Open the active segment for appending
    ///
    /// On startup:
    /// 1. Create the log and archive directories
    /// 2. If the active segment was not closed cleanly, is missing next to
    ///    archives, or the newest archive was never sealed by its rollover,
    ///    replay the retained segments after the store's durable checkpoint
    /// 3. Otherwise reopen the active segment, or create segment 0
    ///
    /// A replay failure is fatal: the writer is released and the manager
    /// refuses to serve.
    pub fn start(&self, store: &dyn MailboxStore) -> Result<RecoveryReport> {
        if self.is_halted() {
            return Err(RedoError::Halted);
        }

        let mut state = self.state.lock();
        if state.writer.is_some() {
            return Err(RedoError::InvalidState(
                "redo log manager already started".to_string(),
            ));
        }

        let log_path = self.config.log_path.clone();
        if let Some(parent) = log_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::create_dir_all(&self.config.archive_dir)?;
        fs::create_dir_all(self.config.rollover_dest_dir())?;

        let active = if log_path.exists() {
            Self::raise_txn_time(&mut state, &log_path)?;
            Some(FileHeader::read_from(&log_path)?)
        } else {
            None
        };

        // Newest archive older than the active segment
        let newest_archive = self
            .archived_segments(0, u64::MAX)?
            .into_iter()
            .rev()
            .find(|s| active.as_ref().map_or(true, |h| s.seq < h.sequence));
        let unsealed_archive = match &newest_archive {
            Some(segment) if FileHeader::read_from(&segment.path)?.open => Some(segment.clone()),
            _ => None,
        };

        let needs_recovery = match (&active, &newest_archive) {
            (Some(header), _) if header.open => {
                tracing::warn!(
                    "Redo log {} was not closed cleanly; starting crash recovery",
                    log_path.display()
                );
                true
            }
            (Some(_), _) => {
                if let Some(segment) = &unsealed_archive {
                    tracing::warn!(
                        "Archived redo log {} was not closed cleanly; starting crash recovery",
                        segment.path.display()
                    );
                }
                unsealed_archive.is_some()
            }
            // Rollover renames the active segment away before creating the
            // next one, so a crash in between leaves only archives
            (None, Some(segment)) => {
                Self::raise_txn_time(&mut state, &segment.path)?;
                tracing::warn!(
                    "Redo log {} is missing but archives exist; starting crash recovery",
                    log_path.display()
                );
                true
            }
            (None, None) => false,
        };

        let mut report = RecoveryReport::default();

        if needs_recovery {
            self.in_crash_recovery.store(true, Ordering::SeqCst);
            let result =
                self.recover_locked(&mut state, store, active.as_ref(), unsealed_archive.as_ref());
            self.in_crash_recovery.store(false, Ordering::SeqCst);

            report = match result {
                Ok(report) => report,
                Err(e) => {
                    state.writer = None;
                    tracing::error!("Crash recovery failed: {}", e);
                    return Err(match e {
                        RedoError::Replay(_) | RedoError::Halted => e,
                        other => RedoError::Replay(other.to_string()),
                    });
                }
            };
        } else if let Some(header) = active {
            let writer = LogWriter::open_existing(&log_path, self.config.sync_strategy)?;
            state.sequence = header.sequence;
            state.dirty = !writer.is_empty();
            state.writer = Some(writer);
        } else {
            let writer = LogWriter::create(&log_path, 0, now_millis(), self.config.sync_strategy)?;
            state.sequence = 0;
            state.dirty = false;
            state.writer = Some(writer);
        }

        tracing::info!(
            "Redo log started: {} (seq {})",
            log_path.display(),
            state.sequence
        );

        Ok(report)
    }

    /// Flush and close the active segment, marking it cleanly shut down
    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(writer) = state.writer.take() {
            let header = writer.close()?;
            tracing::info!("Redo log stopped (seq {})", header.sequence);
        }
        Ok(())
    }

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    /// Allocate the next transaction id
    pub fn new_txn_id(&self) -> Result<TransactionId> {
        if self.is_halted() {
            return Err(RedoError::Halted);
        }
        self.state.lock().txn_ids.next_id()
    }

    /// Durably append a started op
    ///
    /// Returns once the record is appended (and fsynced under
    /// `SyncStrategy::EveryWrite`). A write failure halts the manager.
    pub fn log(&self, op: &mut RedoableOp) -> Result<()> {
        self.check_serving()?;
        if op.state() != OpState::Started {
            return Err(RedoError::InvalidState(format!(
                "cannot log op in state {:?}",
                op.state()
            )));
        }
        let txn_id = Self::txn_of(op)?;

        let mut state = self.state.lock();
        self.append_locked(&mut state, op)?;
        state.active_ops.insert(txn_id, op.clone());
        state.dirty = true;
        op.set_state(OpState::Logged);

        tracing::trace!("Logged: {}", op);

        self.maybe_rollover_locked(&mut state)?;
        Ok(())
    }

    /// Append the commit marker for a logged op
    pub fn commit(&self, op: &mut RedoableOp) -> Result<CommitId> {
        self.check_serving()?;
        if op.state() != OpState::Logged {
            return Err(RedoError::InvalidState(format!(
                "cannot commit op in state {:?}",
                op.state()
            )));
        }
        let txn_id = Self::txn_of(op)?;

        let mut state = self.state.lock();
        let marker = RedoableOp::commit_marker(op, txn_id);
        self.append_locked(&mut state, &marker)?;
        state.active_ops.remove(&txn_id);
        state.dirty = true;

        let commit_id = CommitId::new(state.sequence, op.timestamp(), txn_id);
        state.last_commit = Some(commit_id);
        op.set_state(OpState::Committed);

        tracing::trace!("Committed: {}", commit_id);

        self.maybe_rollover_locked(&mut state)?;
        Ok(commit_id)
    }

    /// End a started or logged op without committing it
    ///
    /// An op that was never logged left nothing in the log, so nothing is
    /// written for it.
    pub fn abort(&self, op: &mut RedoableOp) -> Result<()> {
        if self.is_halted() {
            return Err(RedoError::Halted);
        }
        match op.state() {
            OpState::Started => {
                op.set_state(OpState::Aborted);
                Ok(())
            }
            OpState::Logged => {
                if self.in_crash_recovery() {
                    return Err(RedoError::InvalidState(
                        "redo log is in crash recovery".to_string(),
                    ));
                }
                let txn_id = Self::txn_of(op)?;

                let mut state = self.state.lock();
                let marker = RedoableOp::abort_marker(op, txn_id);
                self.append_locked(&mut state, &marker)?;
                state.active_ops.remove(&txn_id);
                state.dirty = true;
                op.set_state(OpState::Aborted);
                Ok(())
            }
            other => Err(RedoError::InvalidState(format!(
                "cannot abort op in state {:?}",
                other
            ))),
        }
    }

    // =========================================================================
    // Rollover
    // =========================================================================

    /// Archive the active segment and start the next one
    ///
    /// Returns `None`, leaving the sequence unchanged, when nothing was
    /// appended since the segment was opened or last rolled over.
    /// Otherwise returns the archived file, whose name embeds the
    /// pre-rollover sequence (`...-seq{N}.log`); the sequence advances by 1.
    pub fn force_rollover(&self) -> Result<Option<PathBuf>> {
        self.check_serving()?;
        let mut state = self.state.lock();
        self.rollover_locked(&mut state)
    }

    fn maybe_rollover_locked(&self, state: &mut LogState) -> Result<()> {
        let limit = self.config.rollover_file_size;
        if limit == 0 {
            return Ok(());
        }
        let size = state.writer.as_ref().map(|w| w.size()).unwrap_or(0);
        if size > limit {
            tracing::info!("Redo log reached {} bytes (limit {}); rolling over", size, limit);
            self.rollover_locked(state)?;
        }
        Ok(())
    }

    fn rollover_locked(&self, state: &mut LogState) -> Result<Option<PathBuf>> {
        if !state.dirty {
            tracing::debug!("Skipping rollover: no records since the last rollover");
            return Ok(None);
        }

        let mut writer = state.writer.take().ok_or_else(|| {
            RedoError::InvalidState("redo log manager not started".to_string())
        })?;
        let seq = writer.sequence();
        let create_time = writer.header().create_time;

        // The segment keeps its open flag until the next one exists, so a
        // crash anywhere in here is still seen as unclean on restart
        let rotated = (|| -> Result<(PathBuf, LogWriter)> {
            writer.sync()?;

            let dest_dir = self.config.rollover_dest_dir();
            fs::create_dir_all(dest_dir)?;
            let dest = dest_dir.join(rollover::archive_file_name(create_time, seq));
            fs::rename(&self.config.log_path, &dest)?;
            writer.relocated(&dest);
            sync_parent_dir(&dest)?;

            let next = LogWriter::create(
                &self.config.log_path,
                seq + 1,
                now_millis(),
                self.config.sync_strategy,
            )?;
            writer.close()?;
            Ok((dest, next))
        })();

        let (dest, next) = match rotated {
            Ok(pair) => pair,
            Err(e) => {
                self.halt(state, &e);
                return Err(RedoError::Rollover(e.to_string()));
            }
        };

        state.writer = Some(next);
        state.sequence = seq + 1;

        // Transactions still open must be pairable from the new segment alone
        if !state.active_ops.is_empty() {
            let carried: Vec<RedoableOp> = state.active_ops.values().cloned().collect();
            for op in &carried {
                self.append_locked(state, op)?;
            }
            let active_txns = state.active_ops.keys().copied().collect();
            let checkpoint = RedoableOp::checkpoint(active_txns, now_millis());
            self.append_locked(state, &checkpoint)?;
            tracing::debug!("Carried {} active transactions into seq {}", carried.len(), seq + 1);
        }
        state.dirty = false;

        tracing::info!(
            "Rolled over redo log seq {} to {}",
            seq,
            dest.display()
        );

        Ok(Some(dest))
    }

    // =========================================================================
    // Crash Recovery
    // =========================================================================

    fn recover_locked(
        &self,
        state: &mut LogState,
        store: &dyn MailboxStore,
        active: Option<&FileHeader>,
        unsealed_archive: Option<&SegmentInfo>,
    ) -> Result<RecoveryReport> {
        let checkpoint = store.last_durable_commit();
        let from_seq = checkpoint.map(|c| c.redo_seq()).unwrap_or(0);

        let mut segments: Vec<SegmentInfo> = self
            .archived_segments(from_seq, u64::MAX)?
            .into_iter()
            .filter(|s| active.map_or(true, |h| s.seq < h.sequence))
            .collect();
        // An unsealed archive is always rescanned so its tail can be checked
        if let Some(unsealed) = unsealed_archive {
            if !segments.iter().any(|s| s.seq == unsealed.seq) {
                segments.insert(0, unsealed.clone());
            }
        }
        if let Some(header) = active {
            segments.push(SegmentInfo {
                seq: header.sequence,
                path: self.config.log_path.clone(),
                len: fs::metadata(&self.config.log_path)?.len(),
                active: true,
            });
        }

        match checkpoint {
            Some(cp) => tracing::info!("Replaying commits after {}", cp),
            None => tracing::info!("No durable checkpoint; replaying all retained commits"),
        }

        let player = RedoPlayer::new(SerialExecutor::new(store));
        let mut scan = player.run_crash_recovery(&segments, checkpoint)?;

        // Cut any half-written record left by the crash before appending
        // again, and seal archives whose rollover never finished
        let mut junk_bytes_truncated = 0;
        for (segment, segment_scan) in scan.scans.iter_mut() {
            if !segment_scan.header.open {
                continue;
            }
            junk_bytes_truncated += segment_scan.junk_bytes;
            LogScanner::truncate_junk(&segment.path, segment_scan)?;
            if !segment.active {
                seal_segment(&segment.path)?;
            }
        }

        let writer = match active {
            Some(_) => LogWriter::open_existing(&self.config.log_path, self.config.sync_strategy)?,
            None => {
                let seq = self.max_archived_seq()?.map(|s| s + 1).unwrap_or(0);
                LogWriter::create(
                    &self.config.log_path,
                    seq,
                    now_millis(),
                    self.config.sync_strategy,
                )?
            }
        };
        state.sequence = writer.sequence();
        state.dirty = !writer.is_empty();
        state.writer = Some(writer);

        // Never-committed transactions are abandoned so no later scan retries them
        for op in &scan.uncommitted {
            let txn_id = Self::txn_of(op)?;
            tracing::info!("Aborting uncommitted transaction: {}", op);
            let marker = RedoableOp::abort_marker(op, txn_id);
            self.append_locked(state, &marker)?;
        }

        let report = RecoveryReport {
            checkpoint,
            segments_scanned: segments.len(),
            ops_replayed: scan.ops_replayed,
            uncommitted_aborted: scan.uncommitted.len() as u64,
            orphans: scan.orphans,
            junk_bytes_truncated,
        };

        tracing::info!(
            "Crash recovery complete: {} ops redone, {} uncommitted aborted, {} segments scanned",
            report.ops_replayed,
            report.uncommitted_aborted,
            report.segments_scanned
        );

        Ok(report)
    }

    // =========================================================================
    // Internal Helpers
    // =========================================================================

    /// Append one record; any I/O failure halts the manager
    fn append_locked(&self, state: &mut LogState, op: &RedoableOp) -> Result<u64> {
        let writer = state.writer.as_mut().ok_or_else(|| {
            if self.is_halted() {
                RedoError::Halted
            } else {
                RedoError::InvalidState("redo log manager not started".to_string())
            }
        })?;

        match writer.append(op) {
            Ok(offset) => Ok(offset),
            // Encoding failed before anything reached the file
            Err(e @ RedoError::Serialization(_)) | Err(e @ RedoError::InvalidState(_)) => Err(e),
            Err(e) => {
                self.halt(state, &e);
                Err(RedoError::LogWrite(e.to_string()))
            }
        }
    }

    /// Enter the non-serving state after a fatal failure
    ///
    /// The writer is dropped without being closed, so the segment stays
    /// marked open and the next start runs crash recovery.
    fn halt(&self, state: &mut LogState, cause: &RedoError) {
        tracing::error!("Fatal redo log failure, no longer accepting operations: {}", cause);
        self.halted.store(true, Ordering::SeqCst);
        state.writer = None;
    }

    fn check_serving(&self) -> Result<()> {
        if self.is_halted() {
            return Err(RedoError::Halted);
        }
        if self.in_crash_recovery() {
            return Err(RedoError::InvalidState(
                "redo log is in crash recovery".to_string(),
            ));
        }
        Ok(())
    }

    /// Keep new transaction ids clear of those already in `path`, even
    /// when the previous process started within the same second
    fn raise_txn_time(state: &mut LogState, path: &Path) -> Result<()> {
        let modified = fs::metadata(path)?.modified().ok().map(secs_since_epoch);
        if let Some(modified) = modified {
            let current = state.txn_ids.peek();
            if current.time() <= modified {
                state.txn_ids = TxnIdGenerator::starting_at(modified + 1, current.counter());
            }
        }
        Ok(())
    }

    fn txn_of(op: &RedoableOp) -> Result<TransactionId> {
        op.txn_id()
            .ok_or_else(|| RedoError::InvalidState(format!("op {} was never started", op.kind())))
    }

    fn archived_segments(&self, from_seq: u64, to_seq: u64) -> Result<Vec<SegmentInfo>> {
        let mut segments = rollover::archive_logs(&self.config.archive_dir, from_seq, to_seq)?;
        let dest = self.config.rollover_dest_dir();
        if dest != self.config.archive_dir.as_path() {
            segments.extend(rollover::archive_logs(dest, from_seq, to_seq)?);
            segments.sort_by_key(|s| s.seq);
            segments.dedup_by(|a, b| a.path == b.path);
        }
        Ok(segments)
    }

    fn max_archived_seq(&self) -> Result<Option<u64>> {
        Ok(self.archived_segments(0, u64::MAX)?.last().map(|s| s.seq))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Sequence number of the segment currently being written
    pub fn current_log_sequence(&self) -> u64 {
        self.state.lock().sequence
    }

    /// True only while startup replay is running
    pub fn in_crash_recovery(&self) -> bool {
        self.in_crash_recovery.load(Ordering::SeqCst)
    }

    /// True after a fatal failure; the manager no longer accepts work
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().writer.is_some()
    }

    /// Path of the active segment
    pub fn log_file(&self) -> &Path {
        &self.config.log_path
    }

    pub fn archive_dir(&self) -> &Path {
        &self.config.archive_dir
    }

    pub fn rollover_dest_dir(&self) -> &Path {
        self.config.rollover_dest_dir()
    }

    /// Most recent commit made through this manager
    pub fn last_commit(&self) -> Option<CommitId> {
        self.state.lock().last_commit
    }

    /// Logged transactions not yet committed or aborted
    pub fn active_txn_count(&self) -> usize {
        self.state.lock().active_ops.len()
    }

    /// Current length of the active segment
    pub fn log_size(&self) -> u64 {
        self.state
            .lock()
            .writer
            .as_ref()
            .map(|w| w.size())
            .unwrap_or(0)
    }

    /// Retained archives followed by the active segment, in sequence order
    pub fn segments(&self) -> Result<Vec<SegmentInfo>> {
        let state = self.state.lock();
        let mut segments: Vec<SegmentInfo> = self
            .archived_segments(0, u64::MAX)?
            .into_iter()
            .filter(|s| s.seq < state.sequence)
            .collect();

        let len = match &state.writer {
            Some(writer) => writer.size(),
            None if self.config.log_path.exists() => fs::metadata(&self.config.log_path)?.len(),
            None => return Ok(segments),
        };
        segments.push(SegmentInfo {
            seq: state.sequence,
            path: self.config.log_path.clone(),
            len,
            active: true,
        });
        Ok(segments)
    }

    pub fn config(&self) -> &RedoConfig {
        &self.config
    }
}

fn secs_since_epoch(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn now_secs() -> i64 {
    secs_since_epoch(SystemTime::now())
}

/// Epoch millis, the unit of op and segment timestamps
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
