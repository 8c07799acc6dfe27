//! Transaction id allocation

use crate::error::{RedoError, Result};

use super::TransactionId;

/// Hands out transaction ids for one manager process
///
/// Not synchronized: the manager keeps it behind its append lock so ids
/// are allocated in the same order records are written.
#[derive(Debug)]
pub struct TxnIdGenerator {
    time: i64,
    next_counter: i64,
}

impl TxnIdGenerator {
    /// Largest counter that still fits the binary record layout
    pub const MAX_COUNTER: i64 = i32::MAX as i64;

    /// Generator whose first id is `{time}-0`
    pub fn new(time: i64) -> Self {
        Self::starting_at(time, 0)
    }

    pub fn starting_at(time: i64, counter: i64) -> Self {
        Self {
            time,
            next_counter: counter,
        }
    }

    /// Allocate the next id
    pub fn next_id(&mut self) -> Result<TransactionId> {
        if self.next_counter > Self::MAX_COUNTER {
            return Err(RedoError::TxnIdExhausted);
        }
        let id = TransactionId::new(self.time, self.next_counter);
        self.next_counter += 1;
        Ok(id)
    }

    /// The id the next call to `next_id` will return
    pub fn peek(&self) -> TransactionId {
        TransactionId::new(self.time, self.next_counter)
    }
}
