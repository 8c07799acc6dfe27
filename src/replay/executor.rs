//! Op executors
//!
//! The player decides *which* ops to replay; an executor decides *how*.

use crate::error::Result;
use crate::op::RedoableOp;
use crate::store::MailboxStore;

/// Runs ops the player has chosen to replay
pub trait OpExecutor {
    /// Run or schedule `op`
    ///
    /// An error is a failure of this op, or for asynchronous executors an
    /// earlier op's failure that should stop the replay.
    fn execute(&mut self, op: RedoableOp) -> Result<()>;

    /// Wait for all scheduled ops to finish
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    /// Failures recorded off the calling thread
    fn async_failures(&self) -> u64 {
        0
    }
}

/// Applies each op on the calling thread
pub struct SerialExecutor<'a> {
    store: &'a dyn MailboxStore,
}

impl<'a> SerialExecutor<'a> {
    pub fn new(store: &'a dyn MailboxStore) -> Self {
        Self { store }
    }
}

impl OpExecutor for SerialExecutor<'_> {
    fn execute(&mut self, op: RedoableOp) -> Result<()> {
        self.store.redo(&op)
    }
}
