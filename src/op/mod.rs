//! Redoable Operations
//!
//! The unit of work the redo log persists: one mailbox mutation plus the
//! markers that open and close its transaction.
//!
//! ## Lifecycle
//! ```text
//! Created ──start()──▶ Started ──log()──▶ Logged ──commit()──▶ Committed
//!                         │                  │
//!                         └─────abort()──────┴──────abort()───▶ Aborted
//! ```
//!
//! The caller applies its in-memory mutation between `start()` and
//! `log()`. Replay may run a logged op again against a mailbox that
//! already reflects it, so every mutation kind must be idempotent in the
//! `MailboxStore` that executes it.

mod data;
mod kind;

use std::fmt;

pub use data::{
    Checkpoint, CreateFolder, CreateMailbox, CreateMessage, DeleteItems, DeleteMailbox,
    MoveItems, OpData, RenameItem, SetItemTags, StoreIncomingBlob, TxnEnd,
    MAX_MAILBOX_LIST_LENGTH,
};
pub use kind::OpKind;

use crate::error::{RedoError, Result};
use crate::manager::RedoLogManager;
use crate::txn::{CommitId, TransactionId};

/// Mailbox id of ops that are not tied to a single mailbox
pub const MAILBOX_ID_ALL: i32 = -1;

/// Where an op is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpState {
    Created,
    Started,
    Logged,
    Committed,
    Aborted,
}

impl OpState {
    pub fn is_terminal(self) -> bool {
        matches!(self, OpState::Committed | OpState::Aborted)
    }
}

/// A typed, serializable record of one mutating operation
#[derive(Debug, Clone, PartialEq)]
pub struct RedoableOp {
    mailbox_id: i32,
    txn_id: Option<TransactionId>,
    timestamp: i64,
    data: OpData,
    state: OpState,
}

impl RedoableOp {
    /// A new, not yet started mutation against `mailbox_id`
    pub fn new(mailbox_id: i32, data: OpData) -> Self {
        Self {
            mailbox_id,
            txn_id: None,
            timestamp: 0,
            data,
            state: OpState::Created,
        }
    }

    /// An op as read back from a segment (or shipped by a master)
    pub fn decoded(
        kind_data: OpData,
        mailbox_id: i32,
        txn_id: TransactionId,
        timestamp: i64,
    ) -> Self {
        Self {
            mailbox_id,
            txn_id: Some(txn_id),
            timestamp,
            data: kind_data,
            state: OpState::Logged,
        }
    }

    /// Commit marker for `op`, sharing its transaction id and timestamp
    pub(crate) fn commit_marker(op: &RedoableOp, txn_id: TransactionId) -> Self {
        Self::end_marker(op, txn_id, OpData::CommitTxn(TxnEnd { op_code: op.kind().code() }))
    }

    /// Abort marker for `op`
    pub(crate) fn abort_marker(op: &RedoableOp, txn_id: TransactionId) -> Self {
        Self::end_marker(op, txn_id, OpData::AbortTxn(TxnEnd { op_code: op.kind().code() }))
    }

    fn end_marker(op: &RedoableOp, txn_id: TransactionId, data: OpData) -> Self {
        Self {
            mailbox_id: op.mailbox_id,
            txn_id: Some(txn_id),
            timestamp: op.timestamp,
            data,
            state: OpState::Logged,
        }
    }

    /// Checkpoint listing the transactions still open at `timestamp`
    pub(crate) fn checkpoint(active_txns: Vec<TransactionId>, timestamp: i64) -> Self {
        Self {
            mailbox_id: MAILBOX_ID_ALL,
            txn_id: Some(TransactionId::default()),
            timestamp,
            data: OpData::Checkpoint(Checkpoint { active_txns }),
            state: OpState::Logged,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Allocate a transaction id and record the start time
    pub fn start(&mut self, redo_log: &RedoLogManager, timestamp: i64) -> Result<()> {
        if self.state != OpState::Created {
            return Err(RedoError::InvalidState(format!(
                "cannot start op in state {:?}",
                self.state
            )));
        }
        let txn_id = redo_log.new_txn_id()?;
        self.txn_id = Some(txn_id);
        self.timestamp = timestamp;
        self.state = OpState::Started;
        Ok(())
    }

    /// Durably append this op to the active segment
    pub fn log(&mut self, redo_log: &RedoLogManager) -> Result<()> {
        redo_log.log(self)
    }

    /// Append the commit marker and return the resulting CommitId
    pub fn commit(&mut self, redo_log: &RedoLogManager) -> Result<CommitId> {
        redo_log.commit(self)
    }

    /// Append the abort marker (nothing is written if the op was never logged)
    pub fn abort(&mut self, redo_log: &RedoLogManager) -> Result<()> {
        redo_log.abort(self)
    }

    pub(crate) fn set_state(&mut self, state: OpState) {
        self.state = state;
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn kind(&self) -> OpKind {
        self.data.kind()
    }

    pub fn data(&self) -> &OpData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut OpData {
        &mut self.data
    }

    pub fn mailbox_id(&self) -> i32 {
        self.mailbox_id
    }

    /// Retarget the op, e.g. to restore one mailbox's history into another
    pub fn set_mailbox_id(&mut self, mailbox_id: i32) {
        self.mailbox_id = mailbox_id;
    }

    /// `None` until `start()`
    pub fn txn_id(&self) -> Option<TransactionId> {
        self.txn_id
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn state(&self) -> OpState {
        self.state
    }

    pub fn is_start_marker(&self) -> bool {
        self.kind().is_start_marker()
    }

    pub fn is_end_marker(&self) -> bool {
        self.kind().is_end_marker()
    }

    pub fn is_delete_op(&self) -> bool {
        self.kind().is_delete_op()
    }

    /// Kind of op a commit/abort marker closed
    pub fn ended_kind(&self) -> Option<OpKind> {
        match &self.data {
            OpData::CommitTxn(end) | OpData::AbortTxn(end) => OpKind::from_code(end.op_code).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for RedoableOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let txn = self
            .txn_id
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "txn={}, kind={}, mbox={}, tstamp={}",
            txn,
            self.kind(),
            self.mailbox_id,
            self.timestamp
        )?;
        match &self.data {
            OpData::Checkpoint(c) => write!(f, ", active={}", c.active_txns.len()),
            OpData::CommitTxn(_) | OpData::AbortTxn(_) => match self.ended_kind() {
                Some(kind) => write!(f, ", ends={}", kind),
                None => Ok(()),
            },
            OpData::StoreIncomingBlob(b) => write!(
                f,
                ", digest={:?}, size={}, dataLen={}, mbox={:?}",
                b.digest,
                b.msg_size,
                b.data.len(),
                b.mailbox_ids
            ),
            _ => Ok(()),
        }
    }
}
