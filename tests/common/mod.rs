//! Shared fixtures for redo log tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use redolog::op::{CreateFolder, CreateMessage, DeleteItems, OpData, OpKind};
use redolog::{
    CommitId, MailboxStore, RedoConfig, RedoError, RedoLogManager, RedoableOp, Result,
    TransactionId,
};
use tempfile::TempDir;

// =============================================================================
// In-Memory Store
// =============================================================================

/// Mailbox store that remembers which transactions it has applied
///
/// Applying the same transaction twice is a no-op, like a real store.
#[derive(Default)]
pub struct MemoryStore {
    applied: Mutex<HashSet<TransactionId>>,
    ops: Mutex<Vec<RedoableOp>>,
    redo_calls: AtomicU64,
    durable: Mutex<Option<CommitId>>,
    fail_kind: Mutex<Option<OpKind>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_durable_commit(commit: CommitId) -> Self {
        let store = Self::new();
        store.set_durable_commit(Some(commit));
        store
    }

    pub fn set_durable_commit(&self, commit: Option<CommitId>) {
        *self.durable.lock() = commit;
    }

    /// Make every redo of `kind` fail
    pub fn fail_on(&self, kind: OpKind) {
        *self.fail_kind.lock() = Some(kind);
    }

    /// Applied ops, in the order they were first applied
    pub fn ops(&self) -> Vec<RedoableOp> {
        self.ops.lock().clone()
    }

    pub fn applied_count(&self) -> usize {
        self.applied.lock().len()
    }

    pub fn contains(&self, txn_id: TransactionId) -> bool {
        self.applied.lock().contains(&txn_id)
    }

    /// Total redo calls, including repeats
    pub fn redo_calls(&self) -> u64 {
        self.redo_calls.load(Ordering::SeqCst)
    }
}

impl MailboxStore for MemoryStore {
    fn redo(&self, op: &RedoableOp) -> Result<()> {
        self.redo_calls.fetch_add(1, Ordering::SeqCst);

        if *self.fail_kind.lock() == Some(op.kind()) {
            return Err(RedoError::Store(format!("injected failure for {}", op)));
        }

        let txn_id = op
            .txn_id()
            .ok_or_else(|| RedoError::Store("op without transaction id".to_string()))?;
        if self.applied.lock().insert(txn_id) {
            self.ops.lock().push(op.clone());
        }
        Ok(())
    }

    fn last_durable_commit(&self) -> Option<CommitId> {
        *self.durable.lock()
    }
}

// =============================================================================
// Manager Setup
// =============================================================================

/// Config rooted at `dir` with automatic rollover disabled
pub fn test_config(dir: &Path) -> RedoConfig {
    RedoConfig::builder()
        .data_dir(dir)
        .rollover_file_size(0)
        .build()
}

pub fn open_manager(dir: &Path) -> RedoLogManager {
    let manager = RedoLogManager::new(test_config(dir)).unwrap();
    manager.start(&MemoryStore::new()).unwrap();
    manager
}

pub fn setup_manager() -> (TempDir, RedoLogManager) {
    let temp_dir = TempDir::new().unwrap();
    let manager = open_manager(temp_dir.path());
    (temp_dir, manager)
}

/// Simulate a crash: the active segment is never closed
pub fn crash(manager: RedoLogManager) {
    drop(manager);
}

/// Invert one byte of a file in place
pub fn flip_byte(path: &Path, offset: u64) {
    let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.read_exact(&mut byte).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&[byte[0] ^ 0xff]).unwrap();
}

// =============================================================================
// Ops
// =============================================================================

pub fn folder_op(mailbox_id: i32, folder_id: i32) -> RedoableOp {
    RedoableOp::new(
        mailbox_id,
        OpData::CreateFolder(CreateFolder {
            folder_id,
            parent_id: 1,
            name: format!("folder-{}", folder_id),
        }),
    )
}

pub fn message_op(mailbox_id: i32, item_id: i32) -> RedoableOp {
    RedoableOp::new(
        mailbox_id,
        OpData::CreateMessage(CreateMessage {
            item_id,
            folder_id: 2,
            digest: format!("digest-{}", item_id),
            size: 1024,
            received_date: 1_700_000_000_000,
            flags: 0,
            tags: Vec::new(),
        }),
    )
}

pub fn delete_op(mailbox_id: i32, item_ids: Vec<i32>) -> RedoableOp {
    RedoableOp::new(mailbox_id, OpData::DeleteItems(DeleteItems { item_ids }))
}

/// Run the full start/log/commit lifecycle
pub fn commit_op(
    manager: &RedoLogManager,
    mut op: RedoableOp,
    timestamp: i64,
) -> (RedoableOp, CommitId) {
    op.start(manager, timestamp).unwrap();
    op.log(manager).unwrap();
    let commit_id = op.commit(manager).unwrap();
    (op, commit_id)
}

/// Start and log without committing
pub fn log_op(manager: &RedoLogManager, mut op: RedoableOp, timestamp: i64) -> RedoableOp {
    op.start(manager, timestamp).unwrap();
    op.log(manager).unwrap();
    op
}
