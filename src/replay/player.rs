//! Redo Player
//!
//! Walks segments in append order. A start record is held until its
//! commit or abort marker shows up; a commit may release the held op for
//! replay, an abort discards it. Whatever is still held at the end never
//! committed.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{RedoError, Result};
use crate::op::{OpData, OpKind, RedoableOp, MAILBOX_ID_ALL};
use crate::rollover::SegmentInfo;
use crate::txn::{CommitId, TransactionId};
use crate::wal::{LogScanner, ScanResult, TailPolicy};

use super::OpExecutor;

/// Restricts which committed ops a playback replays
#[derive(Debug, Clone)]
pub struct ReplayFilter {
    /// Only ops whose start timestamp is at or after this
    pub from_time: i64,
    /// Only ops whose commit timestamp is at or before this
    pub to_time: i64,
    /// Only ops for this mailbox (plus ops for all mailboxes)
    pub mailbox_id: Option<i32>,
}

impl Default for ReplayFilter {
    fn default() -> Self {
        Self {
            from_time: i64::MIN,
            to_time: i64::MAX,
            mailbox_id: None,
        }
    }
}

impl ReplayFilter {
    /// Decide whether `prepared` (ended by `commit`) passes, narrowing a
    /// multi-recipient blob to the filtered mailbox
    fn admit(&self, prepared: &mut RedoableOp, commit: &RedoableOp) -> bool {
        if prepared.timestamp() < self.from_time || commit.timestamp() > self.to_time {
            return false;
        }

        let target = match self.mailbox_id {
            None => return true,
            Some(id) => id,
        };

        if let OpData::StoreIncomingBlob(blob) = prepared.data_mut() {
            if blob.mailbox_ids.is_empty() {
                // No recipient list recorded: the blob may be needed anywhere
                return true;
            }
            if blob.mailbox_ids.contains(&target) {
                blob.mailbox_ids = vec![target];
                return true;
            }
            return false;
        }

        prepared.mailbox_id() == MAILBOX_ID_ALL || prepared.mailbox_id() == target
    }
}

/// Counters accumulated by a player
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerStats {
    /// Ops handed to the executor without error
    pub ops_replayed: u64,
    /// Ops whose replay failed (and was ignored)
    pub ops_failed: u64,
    /// Committed ops skipped by `skip_delete_ops`
    pub ops_skipped: u64,
    /// Commit/abort markers seen before their start record
    pub orphans: u64,
}

/// What a crash-recovery scan found
#[derive(Debug)]
pub struct RecoveryScan {
    /// Committed ops re-applied
    pub ops_replayed: u64,
    /// Logged ops with no commit or abort, in transaction order
    pub uncommitted: Vec<RedoableOp>,
    pub orphans: u64,
    /// Per-segment scan stats, in scan order
    pub scans: Vec<(SegmentInfo, ScanResult)>,
}

/// Summary returned by `RedoLogManager::start` after crash recovery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub checkpoint: Option<CommitId>,
    pub segments_scanned: usize,
    pub ops_replayed: u64,
    pub uncommitted_aborted: u64,
    pub orphans: u64,
    pub junk_bytes_truncated: u64,
}

/// Pairs start records with their end markers and replays commits
pub struct RedoPlayer<E: OpExecutor> {
    executor: E,
    /// Logged ops waiting for a commit or abort
    pending: HashMap<TransactionId, RedoableOp>,
    /// End markers that arrived before their start record
    orphans: HashMap<TransactionId, RedoableOp>,
    ignore_errors: bool,
    skip_delete_ops: bool,
    stats: PlayerStats,
}

impl<E: OpExecutor> RedoPlayer<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            pending: HashMap::new(),
            orphans: HashMap::new(),
            ignore_errors: false,
            skip_delete_ops: false,
            stats: PlayerStats::default(),
        }
    }

    /// Log and count replay failures instead of stopping
    pub fn ignore_errors(mut self, ignore: bool) -> Self {
        self.ignore_errors = ignore;
        self
    }

    /// Do not replay ops that delete data
    pub fn skip_delete_ops(mut self, skip: bool) -> Self {
        self.skip_delete_ops = skip;
        self
    }

    // =========================================================================
    // Crash Recovery
    // =========================================================================

    /// Replay every commit after `checkpoint` found in `segments`
    ///
    /// `segments` must be in sequence order. In the checkpoint's own
    /// segment, commits after the record matching the checkpoint are
    /// replayed; if no record matches, commits stamped later than the
    /// checkpoint are. Every commit in a later segment is replayed.
    /// Replay failures are fatal, and so is a bad record anywhere but the
    /// torn tail of a segment still marked open.
    pub fn run_crash_recovery(
        mut self,
        segments: &[SegmentInfo],
        checkpoint: Option<CommitId>,
    ) -> Result<RecoveryScan> {
        self.ignore_errors = false;
        self.skip_delete_ops = false;

        let mut passed_checkpoint = checkpoint.is_none();
        let mut scans = Vec::with_capacity(segments.len());

        for segment in segments {
            if let Some(cp) = checkpoint {
                if segment.seq > cp.redo_seq() {
                    passed_checkpoint = true;
                }
            }

            tracing::info!(
                "Scanning redo log segment {} (seq {})",
                segment.path.display(),
                segment.seq
            );

            let seg_seq = segment.seq;
            let passed = &mut passed_checkpoint;
            let mut decide = move |_prepared: &mut RedoableOp, commit: &RedoableOp| -> bool {
                if *passed {
                    return true;
                }
                match checkpoint {
                    None => true,
                    Some(cp) if cp.matches(commit) => {
                        *passed = true;
                        false
                    }
                    Some(cp) => seg_seq == cp.redo_seq() && commit.timestamp() > cp.timestamp(),
                }
            };

            let scan = self.scan_segment(&segment.path, &mut decide)?;
            scans.push((segment.clone(), scan));
        }

        self.executor.finish()?;

        let mut uncommitted: Vec<RedoableOp> = self.pending.drain().map(|(_, op)| op).collect();
        uncommitted.sort_by_key(|op| op.txn_id());

        Ok(RecoveryScan {
            ops_replayed: self.stats.ops_replayed,
            uncommitted,
            orphans: self.stats.orphans,
            scans,
        })
    }

    // =========================================================================
    // Playback
    // =========================================================================

    /// Replay the committed ops of one log file that pass `filter`
    ///
    /// A corrupt record is a `Corruption` error; ops before it have
    /// already been handed to the executor.
    pub fn scan_log(&mut self, path: &Path, filter: &ReplayFilter) -> Result<ScanResult> {
        let mut decide =
            |prepared: &mut RedoableOp, commit: &RedoableOp| filter.admit(prepared, commit);
        self.scan_segment(path, &mut decide)
    }

    /// Wait for the executor and return the final counters
    pub fn finish(mut self) -> Result<PlayerStats> {
        let finished = self.executor.finish();
        let async_failures = self.executor.async_failures();
        self.stats.ops_failed += async_failures;
        self.stats.ops_replayed = self.stats.ops_replayed.saturating_sub(async_failures);
        finished?;
        Ok(self.stats)
    }

    pub fn stats(&self) -> &PlayerStats {
        &self.stats
    }

    /// Transactions seen logged but not yet ended
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // =========================================================================
    // Record Processing
    // =========================================================================

    fn scan_segment<F>(&mut self, path: &Path, decide: &mut F) -> Result<ScanResult>
    where
        F: FnMut(&mut RedoableOp, &RedoableOp) -> bool,
    {
        LogScanner::walk(path, TailPolicy::TornTailOnly, |record| {
            tracing::trace!("Read: {}", record.op);
            self.process_op(record.op, decide)
        })
    }

    fn process_op<F>(&mut self, op: RedoableOp, decide: &mut F) -> Result<()>
    where
        F: FnMut(&mut RedoableOp, &RedoableOp) -> bool,
    {
        let txn_id = op.txn_id().ok_or_else(|| {
            RedoError::Corruption(format!("record without transaction id: {}", op))
        })?;

        if op.is_start_marker() {
            if let Some(orphan) = self.orphans.remove(&txn_id) {
                tracing::error!(
                    "Change record arrived after its orphan commit/abort: change={}, orphan={}",
                    op,
                    orphan
                );
            }
            self.pending.insert(txn_id, op);
            return Ok(());
        }

        if let OpData::Checkpoint(checkpoint) = op.data() {
            if checkpoint.active_txns.len() != self.pending.len() {
                tracing::debug!(
                    "Checkpoint discrepancy: {} current uncommitted ops, {} in checkpoint",
                    self.pending.len(),
                    checkpoint.active_txns.len()
                );
            }
            return Ok(());
        }

        // Commit or abort
        let mut prepared = match self.pending.remove(&txn_id) {
            Some(prepared) => prepared,
            None => {
                tracing::warn!(
                    "Commit/abort record encountered before corresponding change record ({})",
                    op
                );
                self.stats.orphans += 1;
                self.orphans.insert(txn_id, op);
                return Ok(());
            }
        };

        if op.kind() != OpKind::CommitTxn {
            return Ok(());
        }

        if decide(&mut prepared, &op) {
            self.play(prepared)?;
        }
        Ok(())
    }

    fn play(&mut self, op: RedoableOp) -> Result<()> {
        if self.skip_delete_ops && op.is_delete_op() {
            tracing::info!("Skipping delete op: {}", op);
            self.stats.ops_skipped += 1;
            return Ok(());
        }

        tracing::debug!("Redoing: {}", op);
        let description = op.to_string();

        match self.executor.execute(op) {
            Ok(()) => {
                self.stats.ops_replayed += 1;
                Ok(())
            }
            Err(e) if self.ignore_errors => {
                tracing::warn!("Ignoring error during redo log replay of [{}]: {}", description, e);
                self.stats.ops_failed += 1;
                Ok(())
            }
            Err(RedoError::Replay(msg)) => Err(RedoError::Replay(msg)),
            Err(e) => Err(RedoError::Replay(format!(
                "error executing redo op [{}]: {}",
                description, e
            ))),
        }
    }
}
