//! CommitId
//!
//! Durable high-water mark: which segment a transaction committed in,
//! when, and which transaction it was.

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::error::{RedoError, Result};
use crate::op::RedoableOp;

use super::{parse_field, split_fields, TransactionId};

/// Resumption point for recovery and replication
///
/// Ordered by `(redo_seq, timestamp, txn_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitId {
    redo_seq: u64,
    timestamp: i64,
    txn_id: TransactionId,
}

impl CommitId {
    /// Size of the binary encoding
    pub const ENCODED_LEN: usize = 16 + TransactionId::ENCODED_LEN;

    pub fn new(redo_seq: u64, timestamp: i64, txn_id: TransactionId) -> Self {
        Self {
            redo_seq,
            timestamp,
            txn_id,
        }
    }

    /// Commit id for `op` committed while segment `redo_seq` was active
    ///
    /// Returns `None` for an op that was never started.
    pub fn for_op(redo_seq: u64, op: &RedoableOp) -> Option<Self> {
        Some(Self::new(redo_seq, op.timestamp(), op.txn_id()?))
    }

    pub fn redo_seq(&self) -> u64 {
        self.redo_seq
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn txn_id(&self) -> TransactionId {
        self.txn_id
    }

    /// True iff `op` carries this commit's timestamp and transaction id
    ///
    /// The sequence number is deliberately not compared: a transaction
    /// carried into a newer segment still matches.
    pub fn matches(&self, op: &RedoableOp) -> bool {
        op.timestamp() == self.timestamp && op.txn_id() == Some(self.txn_id)
    }

    /// Canonical `{redoSeq}-{timestamp}-{time}-{counter}` form
    pub fn encode_to_string(&self) -> String {
        self.to_string()
    }

    /// Inverse of `encode_to_string`; malformed input is a `Parse` error
    pub fn decode_from_string(s: &str) -> Result<Self> {
        const WHAT: &str = "commit id";
        let [seq, timestamp, time, counter] = split_fields::<4>(s, WHAT)?;
        Ok(Self::new(
            parse_field(seq, s, WHAT)?,
            parse_field(timestamp, s, WHAT)?,
            TransactionId::new(parse_field(time, s, WHAT)?, parse_field(counter, s, WHAT)?),
        ))
    }

    /// Write the fixed 24-byte form
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        buf.put_u64_le(self.redo_seq);
        buf.put_i64_le(self.timestamp);
        self.txn_id.encode(buf)
    }

    /// Read the fixed 24-byte form
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < Self::ENCODED_LEN {
            return Err(RedoError::Corruption(format!(
                "commit id: expected {} bytes, got {}",
                Self::ENCODED_LEN,
                buf.remaining()
            )));
        }
        let redo_seq = buf.get_u64_le();
        let timestamp = buf.get_i64_le();
        let txn_id = TransactionId::decode(buf)?;
        Ok(Self::new(redo_seq, timestamp, txn_id))
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.redo_seq, self.timestamp, self.txn_id)
    }
}

impl FromStr for CommitId {
    type Err = RedoError;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode_from_string(s)
    }
}
