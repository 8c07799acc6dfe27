//! Tests for RedoLogManager
//!
//! These tests verify:
//! - Startup, clean shutdown and restart
//! - Transaction id allocation under concurrency
//! - What log/commit/abort write to the active segment
//! - Lifecycle preconditions
//! - A fatal failure stops the manager until the next start recovers
//! - The crash recovery flag while replay runs

#[path = "../common/mod.rs"]
mod common;

use std::collections::HashSet;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use common::{
    commit_op, crash, folder_op, log_op, message_op, open_manager, setup_manager, test_config,
    MemoryStore,
};
use parking_lot::Mutex;
use redolog::config::SyncStrategy;
use redolog::op::OpKind;
use redolog::replay::RecoveryReport;
use redolog::wal::{FileHeader, LogScanner};
use redolog::{MailboxStore, RedoConfig, RedoError, RedoLogManager, RedoableOp, Result};
use tempfile::TempDir;

fn record_kinds(manager: &RedoLogManager) -> Vec<OpKind> {
    let (records, _) = LogScanner::scan(manager.log_file()).unwrap();
    records.iter().map(|r| r.op.kind()).collect()
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_fresh_start() {
    let (temp, manager) = setup_manager();

    assert!(manager.is_started());
    assert!(!manager.in_crash_recovery());
    assert!(!manager.is_halted());
    assert_eq!(manager.current_log_sequence(), 0);
    assert_eq!(manager.log_file(), temp.path().join("redo.log"));
    assert_eq!(manager.archive_dir(), temp.path().join("archive"));
    assert_eq!(manager.rollover_dest_dir(), manager.archive_dir());
    assert!(manager.archive_dir().is_dir());
    assert!(FileHeader::read_from(manager.log_file()).unwrap().open);
}

#[test]
fn test_clean_stop_and_restart() {
    let temp = TempDir::new().unwrap();
    let manager = open_manager(temp.path());
    commit_op(&manager, folder_op(1, 10), 1_000);
    manager.stop().unwrap();
    assert!(!manager.is_started());
    assert!(!FileHeader::read_from(manager.log_file()).unwrap().open);

    let store = MemoryStore::new();
    let manager = RedoLogManager::new(test_config(temp.path())).unwrap();
    let report = manager.start(&store).unwrap();

    assert_eq!(report, RecoveryReport::default());
    assert_eq!(store.redo_calls(), 0);
    assert!(!manager.in_crash_recovery());
    assert_eq!(record_kinds(&manager), vec![OpKind::CreateFolder, OpKind::CommitTxn]);
}

#[test]
fn test_start_twice_fails() {
    let (_temp, manager) = setup_manager();
    let err = manager.start(&MemoryStore::new()).unwrap_err();
    assert!(matches!(err, RedoError::InvalidState(_)));
}

#[test]
fn test_stop_is_idempotent() {
    let (_temp, manager) = setup_manager();
    manager.stop().unwrap();
    manager.stop().unwrap();
}

#[test]
fn test_log_before_start_fails() {
    let temp = TempDir::new().unwrap();
    let manager = RedoLogManager::new(test_config(temp.path())).unwrap();

    let mut op = folder_op(1, 10);
    op.start(&manager, 1_000).unwrap();
    assert!(matches!(op.log(&manager), Err(RedoError::InvalidState(_))));
}

#[test]
fn test_invalid_config_rejected() {
    let temp = TempDir::new().unwrap();
    let config = RedoConfig::builder()
        .data_dir(temp.path())
        .sync_strategy(SyncStrategy::EveryNEntries { count: 0 })
        .build();
    assert!(matches!(RedoLogManager::new(config), Err(RedoError::Config(_))));
}

// =============================================================================
// Transaction Id Tests
// =============================================================================

#[test]
fn test_txn_ids_increment() {
    let (_temp, manager) = setup_manager();
    let first = manager.new_txn_id().unwrap();
    let second = manager.new_txn_id().unwrap();

    assert_eq!(second.time(), first.time());
    assert_eq!(second.counter(), first.counter() + 1);
}

#[test]
fn test_txn_ids_unique_across_threads() {
    let (_temp, manager) = setup_manager();
    let manager = Arc::new(manager);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                (0..200)
                    .map(|_| manager.new_txn_id().unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(seen.insert(id), "duplicate transaction id {}", id);
        }
    }
    assert_eq!(seen.len(), 1600);
}

#[test]
fn test_txn_ids_do_not_repeat_after_restart() {
    let temp = TempDir::new().unwrap();
    let manager = open_manager(temp.path());
    let (first, _) = commit_op(&manager, folder_op(1, 10), 1_000);
    manager.stop().unwrap();

    let manager = open_manager(temp.path());
    let (second, _) = commit_op(&manager, folder_op(1, 11), 2_000);
    assert!(second.txn_id().unwrap() > first.txn_id().unwrap());
}

// =============================================================================
// Append Tests
// =============================================================================

#[test]
fn test_commit_writes_op_and_marker() {
    let (_temp, manager) = setup_manager();
    let (op, commit) = commit_op(&manager, message_op(4, 100), 5_000);

    assert_eq!(commit.redo_seq(), 0);
    assert_eq!(commit.timestamp(), 5_000);
    assert_eq!(Some(commit.txn_id()), op.txn_id());
    assert_eq!(manager.last_commit(), Some(commit));
    assert_eq!(manager.active_txn_count(), 0);

    let (records, _) = LogScanner::scan(manager.log_file()).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].op.kind(), OpKind::CommitTxn);
    assert_eq!(records[1].op.txn_id(), op.txn_id());
    assert_eq!(records[1].op.ended_kind(), Some(OpKind::CreateMessage));
    assert!(commit.matches(&records[1].op));
}

#[test]
fn test_abort_before_log_writes_nothing() {
    let (_temp, manager) = setup_manager();
    let before = manager.log_size();

    let mut op = folder_op(1, 10);
    op.start(&manager, 1_000).unwrap();
    op.abort(&manager).unwrap();

    assert_eq!(manager.log_size(), before);
    assert!(record_kinds(&manager).is_empty());
}

#[test]
fn test_abort_after_log_writes_marker() {
    let (_temp, manager) = setup_manager();
    let mut op = log_op(&manager, folder_op(1, 10), 1_000);
    assert_eq!(manager.active_txn_count(), 1);

    op.abort(&manager).unwrap();
    assert_eq!(manager.active_txn_count(), 0);
    assert_eq!(record_kinds(&manager), vec![OpKind::CreateFolder, OpKind::AbortTxn]);
}

#[test]
fn test_concurrent_commits() {
    let (_temp, manager) = setup_manager();
    let manager = Arc::new(manager);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                for i in 0..25 {
                    commit_op(&manager, message_op(t, i), (t * 100 + i) as i64);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    manager.stop().unwrap();

    let (records, scan) = LogScanner::scan(manager.log_file()).unwrap();
    assert_eq!(scan.junk_bytes, 0);
    let commits = records.iter().filter(|r| r.op.kind() == OpKind::CommitTxn).count();
    assert_eq!(commits, 100);

    // Every commit follows its own start record
    let mut started = HashSet::new();
    for record in &records {
        let txn = record.op.txn_id().unwrap();
        if record.op.is_start_marker() {
            assert!(started.insert(txn));
        } else {
            assert!(started.contains(&txn));
        }
    }
}

// =============================================================================
// Segment Listing Tests
// =============================================================================

#[test]
fn test_segments_lists_archives_then_active() {
    let (_temp, manager) = setup_manager();
    commit_op(&manager, folder_op(1, 10), 1_000);
    manager.force_rollover().unwrap().unwrap();
    commit_op(&manager, folder_op(1, 11), 2_000);

    let segments = manager.segments().unwrap();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].seq, 0);
    assert!(!segments[0].active);
    assert_eq!(segments[1].seq, 1);
    assert!(segments[1].active);
    assert_eq!(segments[1].len, manager.log_size());
}

// =============================================================================
// Fatal Failure Tests
// =============================================================================

#[test]
fn test_rollover_failure_halts_manager() {
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("outgoing");
    let config = RedoConfig::builder()
        .data_dir(temp.path())
        .rollover_dest_dir(dest.clone())
        .rollover_file_size(0)
        .build();
    let manager = RedoLogManager::new(config.clone()).unwrap();
    manager.start(&MemoryStore::new()).unwrap();

    let (committed, _) = commit_op(&manager, folder_op(1, 10), 1_000);
    let mut logged = log_op(&manager, folder_op(1, 11), 1_100);
    let mut started = folder_op(1, 12);
    started.start(&manager, 1_200).unwrap();

    // A regular file where the destination directory should be
    fs::remove_dir(&dest).unwrap();
    fs::write(&dest, b"not a directory").unwrap();

    let err = manager.force_rollover().unwrap_err();
    assert!(matches!(err, RedoError::Rollover(_)));
    assert!(err.is_fatal());
    assert!(manager.is_halted());
    assert!(!manager.is_started());

    // The segment was never closed, so it still reads as a crash
    assert!(FileHeader::read_from(manager.log_file()).unwrap().open);

    assert!(matches!(manager.new_txn_id(), Err(RedoError::Halted)));
    assert!(matches!(started.log(&manager), Err(RedoError::Halted)));
    assert!(matches!(logged.commit(&manager), Err(RedoError::Halted)));
    assert!(matches!(logged.abort(&manager), Err(RedoError::Halted)));
    assert!(matches!(started.abort(&manager), Err(RedoError::Halted)));
    assert!(matches!(manager.force_rollover(), Err(RedoError::Halted)));
    assert!(matches!(manager.start(&MemoryStore::new()), Err(RedoError::Halted)));
    assert!(RedoError::Halted.is_fatal());
    drop(manager);

    fs::remove_file(&dest).unwrap();
    let store = MemoryStore::new();
    let manager = RedoLogManager::new(config).unwrap();
    let report = manager.start(&store).unwrap();

    assert_eq!(report.ops_replayed, 1);
    assert_eq!(report.uncommitted_aborted, 1);
    assert!(store.contains(committed.txn_id().unwrap()));
    assert!(!manager.is_halted());
    assert_eq!(manager.current_log_sequence(), 0);
}

#[test]
fn test_per_call_errors_are_not_fatal() {
    assert!(!RedoError::InvalidState("x".to_string()).is_fatal());
    assert!(!RedoError::Serialization("x".to_string()).is_fatal());
    assert!(!RedoError::Corruption("x".to_string()).is_fatal());
    assert!(RedoError::LogWrite("x".to_string()).is_fatal());
    assert!(RedoError::Replay("x".to_string()).is_fatal());

    // A rejected call leaves the manager serving
    let (_temp, manager) = setup_manager();
    let mut op = folder_op(1, 10);
    assert!(matches!(manager.log(&mut op), Err(RedoError::InvalidState(_))));
    assert!(!manager.is_halted());
    commit_op(&manager, folder_op(1, 11), 1_000);
}

// =============================================================================
// Crash Recovery Flag Tests
// =============================================================================

/// Store that looks at the manager while its ops are being replayed
#[derive(Default)]
struct ObservingStore {
    manager: Mutex<Option<Arc<RedoLogManager>>>,
    started_op: Mutex<Option<RedoableOp>>,
    saw_recovery: AtomicBool,
    log_error: Mutex<Option<RedoError>>,
}

impl MailboxStore for ObservingStore {
    fn redo(&self, _op: &RedoableOp) -> Result<()> {
        if let Some(manager) = self.manager.lock().as_ref() {
            self.saw_recovery.store(manager.in_crash_recovery(), Ordering::SeqCst);
            if let Some(op) = self.started_op.lock().as_mut() {
                if let Err(e) = op.log(manager) {
                    *self.log_error.lock() = Some(e);
                }
            }
        }
        Ok(())
    }
}

#[test]
fn test_in_crash_recovery_while_replaying() {
    let temp = TempDir::new().unwrap();
    let manager = open_manager(temp.path());
    commit_op(&manager, folder_op(1, 10), 1_000);
    let mut late = folder_op(1, 11);
    late.start(&manager, 2_000).unwrap();
    crash(manager);

    let manager = Arc::new(RedoLogManager::new(test_config(temp.path())).unwrap());
    let store = ObservingStore::default();
    *store.manager.lock() = Some(Arc::clone(&manager));
    *store.started_op.lock() = Some(late);

    let report = manager.start(&store).unwrap();
    assert_eq!(report.ops_replayed, 1);
    assert!(store.saw_recovery.load(Ordering::SeqCst));
    assert!(matches!(store.log_error.lock().take(), Some(RedoError::InvalidState(_))));
    assert!(!manager.in_crash_recovery());

    // Once replay is over the same op is accepted
    let mut late = store.started_op.lock().take().unwrap();
    late.log(&manager).unwrap();
    late.commit(&manager).unwrap();
    manager.stop().unwrap();
}
