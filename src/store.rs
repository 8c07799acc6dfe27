//! Mailbox Store Collaborator
//!
//! The redo log does not know how mailboxes are stored. Replay hands each
//! committed op to a `MailboxStore`, which must apply it idempotently: the
//! mutation may already have landed (fully or partially) before the crash.

use crate::error::Result;
use crate::op::RedoableOp;
use crate::txn::CommitId;

/// Applies decoded operations to mailbox content
pub trait MailboxStore: Send + Sync {
    /// Re-apply `op`; applying an op the mailbox already reflects must be
    /// a no-op
    fn redo(&self, op: &RedoableOp) -> Result<()>;

    /// Last commit known to be durable in the content store
    ///
    /// Crash recovery replays only commits after this point. `None` means
    /// everything retained in the log is replayed.
    fn last_durable_commit(&self) -> Option<CommitId> {
        None
    }
}
