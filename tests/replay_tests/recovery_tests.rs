//! Tests for crash recovery
//!
//! These tests verify:
//! - Committed ops are replayed after an unclean shutdown
//! - Uncommitted ops are aborted, never replayed
//! - Replay starts after the store's durable commit
//! - Torn tails are truncated before appending resumes
//! - Replay failures refuse startup
//! - Corrupt archives refuse startup
//! - A crash part way through a rollover is recovered

#[path = "../common/mod.rs"]
mod common;

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use common::{
    commit_op, crash, delete_op, flip_byte, folder_op, log_op, message_op, open_manager,
    test_config, MemoryStore,
};
use redolog::config::SyncStrategy;
use redolog::op::{CreateFolder, OpData, OpKind, TxnEnd};
use redolog::replay::{RecoveryReport, RedoPlayer, SerialExecutor};
use redolog::rollover::{all_archive_logs, archive_file_name, SegmentInfo};
use redolog::wal::{FileHeader, LogScanner, LogWriter, HEADER_SIZE};
use redolog::{RedoError, RedoLogManager, RedoableOp, TransactionId};
use tempfile::TempDir;

fn restart(temp: &TempDir, store: &MemoryStore) -> (RedoLogManager, RecoveryReport) {
    let manager = RedoLogManager::new(test_config(temp.path())).unwrap();
    let report = manager.start(store).unwrap();
    (manager, report)
}

// =============================================================================
// Basic Recovery Tests
// =============================================================================

#[test]
fn test_committed_ops_replayed_after_crash() {
    let temp = TempDir::new().unwrap();
    let manager = open_manager(temp.path());
    let (a, _) = commit_op(&manager, folder_op(1, 10), 1_000);
    let (b, _) = commit_op(&manager, message_op(2, 20), 2_000);
    crash(manager);

    let store = MemoryStore::new();
    let (manager, report) = restart(&temp, &store);

    assert_eq!(report.ops_replayed, 2);
    assert_eq!(report.uncommitted_aborted, 0);
    assert_eq!(report.segments_scanned, 1);
    assert!(store.contains(a.txn_id().unwrap()));
    assert!(store.contains(b.txn_id().unwrap()));
    assert!(!manager.in_crash_recovery());
    assert!(manager.is_started());
}

#[test]
fn test_uncommitted_ops_aborted_not_replayed() {
    let temp = TempDir::new().unwrap();
    let manager = open_manager(temp.path());
    let (committed, _) = commit_op(&manager, folder_op(1, 10), 1_000);
    let pending = log_op(&manager, folder_op(1, 11), 2_000);
    let mut aborted = log_op(&manager, folder_op(1, 12), 3_000);
    aborted.abort(&manager).unwrap();
    crash(manager);

    let store = MemoryStore::new();
    let (manager, report) = restart(&temp, &store);

    assert_eq!(report.ops_replayed, 1);
    assert_eq!(report.uncommitted_aborted, 1);
    assert!(store.contains(committed.txn_id().unwrap()));
    assert!(!store.contains(pending.txn_id().unwrap()));
    assert!(!store.contains(aborted.txn_id().unwrap()));

    // The abandoned transaction is closed in the log
    let (records, _) = LogScanner::scan(manager.log_file()).unwrap();
    let last = records.last().unwrap();
    assert_eq!(last.op.kind(), OpKind::AbortTxn);
    assert_eq!(last.op.txn_id(), pending.txn_id());

    // ...so a second crash replays nothing new and aborts nothing
    crash(manager);
    let store = MemoryStore::new();
    let (_manager, report) = restart(&temp, &store);
    assert_eq!(report.ops_replayed, 1);
    assert_eq!(report.uncommitted_aborted, 0);
}

#[test]
fn test_replay_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let manager = open_manager(temp.path());
    for i in 0..5 {
        commit_op(&manager, message_op(3, i), i as i64);
    }
    crash(manager);

    // The store already holds everything; replay must not change it
    let store = MemoryStore::new();
    let (manager, _) = restart(&temp, &store);
    let after_first = store.ops();
    crash(manager);

    let (_manager, report) = restart(&temp, &store);
    assert_eq!(report.ops_replayed, 5);
    assert_eq!(store.ops(), after_first);
    assert_eq!(store.applied_count(), 5);
    assert_eq!(store.redo_calls(), 10);
}

#[test]
fn test_clean_shutdown_skips_recovery() {
    let temp = TempDir::new().unwrap();
    let manager = open_manager(temp.path());
    commit_op(&manager, folder_op(1, 10), 1_000);
    log_op(&manager, folder_op(1, 11), 2_000);
    manager.stop().unwrap();

    let store = MemoryStore::new();
    let (_manager, report) = restart(&temp, &store);
    assert_eq!(report.segments_scanned, 0);
    assert_eq!(store.redo_calls(), 0);
}

// =============================================================================
// Checkpoint Tests
// =============================================================================

#[test]
fn test_replay_starts_after_durable_commit() {
    let temp = TempDir::new().unwrap();
    let manager = open_manager(temp.path());
    let (a, _) = commit_op(&manager, folder_op(1, 10), 1_000);
    let (_, durable) = commit_op(&manager, folder_op(1, 11), 2_000);
    let (c, _) = commit_op(&manager, folder_op(1, 12), 3_000);
    crash(manager);

    let store = MemoryStore::with_durable_commit(durable);
    let (_manager, report) = restart(&temp, &store);

    assert_eq!(report.checkpoint, Some(durable));
    assert_eq!(report.ops_replayed, 1);
    assert!(!store.contains(a.txn_id().unwrap()));
    assert!(!store.contains(durable.txn_id()));
    assert!(store.contains(c.txn_id().unwrap()));
}

#[test]
fn test_replay_spans_archived_segments() {
    let temp = TempDir::new().unwrap();
    let manager = open_manager(temp.path());
    let (_, durable) = commit_op(&manager, folder_op(1, 10), 1_000);
    let (b, _) = commit_op(&manager, folder_op(1, 11), 2_000);
    manager.force_rollover().unwrap().unwrap();
    let (c, _) = commit_op(&manager, folder_op(1, 12), 3_000);
    manager.force_rollover().unwrap().unwrap();
    let (d, _) = commit_op(&manager, folder_op(1, 13), 4_000);
    crash(manager);

    let store = MemoryStore::with_durable_commit(durable);
    let (manager, report) = restart(&temp, &store);

    assert_eq!(report.segments_scanned, 3);
    assert_eq!(report.ops_replayed, 3);
    for op in [&b, &c, &d] {
        assert!(store.contains(op.txn_id().unwrap()));
    }
    assert_eq!(manager.current_log_sequence(), 2);
}

#[test]
fn test_archives_before_checkpoint_segment_not_scanned() {
    let temp = TempDir::new().unwrap();
    let manager = open_manager(temp.path());
    commit_op(&manager, folder_op(1, 10), 1_000);
    manager.force_rollover().unwrap().unwrap();
    let (_, durable) = commit_op(&manager, folder_op(1, 11), 2_000);
    manager.force_rollover().unwrap().unwrap();
    commit_op(&manager, folder_op(1, 12), 3_000);
    crash(manager);

    let store = MemoryStore::with_durable_commit(durable);
    let (_manager, report) = restart(&temp, &store);

    assert_eq!(durable.redo_seq(), 1);
    assert_eq!(report.segments_scanned, 2);
    assert_eq!(report.ops_replayed, 1);
}

#[test]
fn test_transaction_carried_across_rollover_replays_once() {
    let temp = TempDir::new().unwrap();
    let manager = open_manager(temp.path());
    let mut op = log_op(&manager, message_op(5, 1), 1_000);
    manager.force_rollover().unwrap().unwrap();
    op.commit(&manager).unwrap();
    crash(manager);

    let store = MemoryStore::new();
    let (_manager, report) = restart(&temp, &store);

    assert_eq!(report.ops_replayed, 1);
    assert_eq!(store.redo_calls(), 1);
    assert!(store.contains(op.txn_id().unwrap()));
}

// =============================================================================
// Torn Tail Tests
// =============================================================================

#[test]
fn test_torn_tail_truncated() {
    let temp = TempDir::new().unwrap();
    let manager = open_manager(temp.path());
    commit_op(&manager, folder_op(1, 10), 1_000);
    let good_len = manager.log_size();
    let log_path = manager.log_file().to_path_buf();
    crash(manager);

    let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
    file.write_all(&[0x20, 0, 0, 0, 0xde, 0xad]).unwrap();
    drop(file);

    let store = MemoryStore::new();
    let (manager, report) = restart(&temp, &store);
    assert_eq!(report.junk_bytes_truncated, 6);
    assert_eq!(report.ops_replayed, 1);
    assert_eq!(manager.log_size(), good_len);

    commit_op(&manager, folder_op(1, 11), 2_000);
    manager.stop().unwrap();

    let scan = LogScanner::verify(&log_path).unwrap();
    assert_eq!(scan.junk_bytes, 0);
    assert_eq!(scan.records, 4);
}

// =============================================================================
// Failure Tests
// =============================================================================

#[test]
fn test_replay_failure_refuses_start() {
    let temp = TempDir::new().unwrap();
    let manager = open_manager(temp.path());
    commit_op(&manager, delete_op(1, vec![1, 2]), 1_000);
    crash(manager);

    let store = MemoryStore::new();
    store.fail_on(OpKind::DeleteItems);

    let manager = RedoLogManager::new(test_config(temp.path())).unwrap();
    let err = manager.start(&store).unwrap_err();

    assert!(matches!(err, RedoError::Replay(_)));
    assert!(err.is_fatal());
    assert!(!manager.is_started());
    assert!(!manager.in_crash_recovery());
    assert!(FileHeader::read_from(manager.log_file()).unwrap().open);

    // Once the store is healthy, recovery succeeds
    let (_manager, report) = restart(&temp, &MemoryStore::new());
    assert_eq!(report.ops_replayed, 1);
}

// =============================================================================
// Player Tests
// =============================================================================

#[test]
fn test_orphan_end_marker_counted() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("redo.log");
    let txn = TransactionId::new(50, 1);
    let start = RedoableOp::decoded(
        OpData::CreateFolder(CreateFolder {
            folder_id: 4,
            parent_id: 1,
            name: "late".to_string(),
        }),
        1,
        txn,
        1_000,
    );
    let commit = RedoableOp::decoded(
        OpData::CommitTxn(TxnEnd { op_code: OpKind::CreateFolder.code() }),
        1,
        txn,
        1_000,
    );

    // Commit written before its start record
    let mut writer = LogWriter::create(&path, 0, 1, SyncStrategy::EveryWrite).unwrap();
    writer.append(&commit).unwrap();
    writer.append(&start).unwrap();
    drop(writer);

    let segments = vec![SegmentInfo {
        seq: 0,
        len: std::fs::metadata(&path).unwrap().len(),
        path,
        active: true,
    }];
    let store = MemoryStore::new();
    let scan = RedoPlayer::new(SerialExecutor::new(&store))
        .run_crash_recovery(&segments, None)
        .unwrap();

    assert_eq!(scan.orphans, 1);
    assert_eq!(scan.ops_replayed, 0);
    assert_eq!(scan.uncommitted.len(), 1);
    assert_eq!(store.redo_calls(), 0);
}

#[test]
fn test_rolled_segment_is_self_contained() {
    let temp = TempDir::new().unwrap();
    let manager = open_manager(temp.path());
    let mut op = log_op(&manager, folder_op(1, 10), 1_000);
    let archived = manager.force_rollover().unwrap().unwrap();
    op.commit(&manager).unwrap();
    manager.stop().unwrap();

    // The carried start record pairs with the commit without the archive
    std::fs::remove_file(&archived).unwrap();
    let segments = vec![SegmentInfo {
        seq: 1,
        path: manager.log_file().to_path_buf(),
        len: std::fs::metadata(manager.log_file()).unwrap().len(),
        active: true,
    }];
    let store = MemoryStore::new();
    let scan = RedoPlayer::new(SerialExecutor::new(&store))
        .run_crash_recovery(&segments, None)
        .unwrap();

    assert_eq!(scan.orphans, 0);
    assert_eq!(scan.ops_replayed, 1);
    assert!(scan.uncommitted.is_empty());
    assert!(store.contains(op.txn_id().unwrap()));
}

// =============================================================================
// Archive Corruption Tests
// =============================================================================

/// Two committed ops in archive seq 0, one more in the active seq 1
fn crash_after_rollover(temp: &TempDir) -> (Vec<TransactionId>, PathBuf) {
    let manager = open_manager(temp.path());
    let (a, _) = commit_op(&manager, folder_op(1, 10), 1_000);
    let (b, _) = commit_op(&manager, folder_op(1, 11), 2_000);
    let archived = manager.force_rollover().unwrap().unwrap();
    let (c, _) = commit_op(&manager, folder_op(1, 12), 3_000);
    crash(manager);

    let txns = [a, b, c].iter().map(|op| op.txn_id().unwrap()).collect();
    (txns, archived)
}

#[test]
fn test_corrupt_archived_record_refuses_start() {
    let temp = TempDir::new().unwrap();
    let (txns, archived) = crash_after_rollover(&temp);
    let archived_len = fs::metadata(&archived).unwrap().len();

    // Inside the body of the archive's first record
    flip_byte(&archived, HEADER_SIZE + 20);

    let store = MemoryStore::new();
    let manager = RedoLogManager::new(test_config(temp.path())).unwrap();
    let err = manager.start(&store).unwrap_err();

    assert!(matches!(err, RedoError::Replay(_)), "{:?}", err);
    assert!(!manager.is_started());
    assert!(!manager.in_crash_recovery());
    assert!(!store.contains(txns[0]));
    assert!(!store.contains(txns[1]));
    assert_eq!(fs::metadata(&archived).unwrap().len(), archived_len);
}

#[test]
fn test_truncated_sealed_archive_refuses_start() {
    let temp = TempDir::new().unwrap();
    let (_, archived) = crash_after_rollover(&temp);
    assert!(!FileHeader::read_from(&archived).unwrap().open);

    let len = fs::metadata(&archived).unwrap().len();
    OpenOptions::new().write(true).open(&archived).unwrap().set_len(len - 3).unwrap();

    let manager = RedoLogManager::new(test_config(temp.path())).unwrap();
    assert!(matches!(manager.start(&MemoryStore::new()), Err(RedoError::Replay(_))));
    assert_eq!(fs::metadata(&archived).unwrap().len(), len - 3);
}

// =============================================================================
// Interrupted Rollover Tests
// =============================================================================

/// Commit one op, crash, and rename the still-open segment into the archive
/// the way a rollover does first
fn crash_after_rename(temp: &TempDir) -> (TransactionId, PathBuf) {
    let manager = open_manager(temp.path());
    let (op, _) = commit_op(&manager, folder_op(1, 10), 1_000);
    let log_path = manager.log_file().to_path_buf();
    let archive_dir = manager.archive_dir().to_path_buf();
    crash(manager);

    let header = FileHeader::read_from(&log_path).unwrap();
    let archived = archive_dir.join(archive_file_name(header.create_time, header.sequence));
    fs::rename(&log_path, &archived).unwrap();
    (op.txn_id().unwrap(), archived)
}

fn assert_sealed(path: &Path) {
    assert!(!FileHeader::read_from(path).unwrap().open, "{} still open", path.display());
}

#[test]
fn test_crash_between_rename_and_new_segment() {
    let temp = TempDir::new().unwrap();
    let (txn, archived) = crash_after_rename(&temp);

    let store = MemoryStore::new();
    let (manager, report) = restart(&temp, &store);

    assert_eq!(report.ops_replayed, 1);
    assert!(store.contains(txn));
    assert_eq!(manager.current_log_sequence(), 1);
    assert!(manager.log_file().exists());
    assert_sealed(&archived);
}

#[test]
fn test_crash_before_archive_sealed() {
    let temp = TempDir::new().unwrap();
    let (txn, archived) = crash_after_rename(&temp);
    let config = test_config(temp.path());
    drop(LogWriter::create(&config.log_path, 1, 2_000, SyncStrategy::EveryWrite).unwrap());

    let store = MemoryStore::new();
    let (manager, report) = restart(&temp, &store);

    assert_eq!(report.segments_scanned, 2);
    assert_eq!(report.ops_replayed, 1);
    assert!(store.contains(txn));
    assert_eq!(manager.current_log_sequence(), 1);
    assert_sealed(&archived);
}

#[test]
fn test_unsealed_archive_behind_clean_segment_recovered() {
    let temp = TempDir::new().unwrap();
    let (txn, archived) = crash_after_rename(&temp);
    let config = test_config(temp.path());
    let writer = LogWriter::create(&config.log_path, 1, 2_000, SyncStrategy::EveryWrite).unwrap();
    writer.close().unwrap();

    let store = MemoryStore::new();
    let (manager, report) = restart(&temp, &store);
    assert_eq!(report.ops_replayed, 1);
    assert!(store.contains(txn));
    assert_sealed(&archived);
    manager.stop().unwrap();

    // Sealed now, so the next clean start replays nothing
    let (_manager, report) = restart(&temp, &MemoryStore::new());
    assert_eq!(report, RecoveryReport::default());
}

#[test]
fn test_missing_active_segment_replays_archives() {
    let temp = TempDir::new().unwrap();
    let (txns, _) = crash_after_rollover(&temp);
    fs::remove_file(test_config(temp.path()).log_path).unwrap();

    let store = MemoryStore::new();
    let (manager, report) = restart(&temp, &store);

    assert_eq!(report.segments_scanned, 1);
    assert_eq!(report.ops_replayed, 2);
    assert!(store.contains(txns[0]));
    assert!(store.contains(txns[1]));
    assert_eq!(manager.current_log_sequence(), 1);
    assert_eq!(all_archive_logs(manager.archive_dir()).unwrap().len(), 1);
}

#[test]
fn test_torn_tail_of_unsealed_archive_truncated() {
    let temp = TempDir::new().unwrap();
    let (txn, archived) = crash_after_rename(&temp);
    let good_len = fs::metadata(&archived).unwrap().len();
    let mut file = OpenOptions::new().append(true).open(&archived).unwrap();
    file.write_all(&[0x40, 0, 0, 0, 1, 2, 3, 4, 5]).unwrap();
    drop(file);

    let store = MemoryStore::new();
    let (_manager, report) = restart(&temp, &store);

    assert_eq!(report.junk_bytes_truncated, 9);
    assert!(store.contains(txn));
    assert_eq!(fs::metadata(&archived).unwrap().len(), good_len);
    assert_sealed(&archived);
}
