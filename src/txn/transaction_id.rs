//! TransactionId
//!
//! Process-scoped, totally ordered identifier of a mailbox transaction.

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::error::{RedoError, Result};

use super::{parse_field, split_fields};

/// Identifies one logical transaction for the life of a manager process
///
/// `time` is the owning manager's start time in epoch seconds (0 when
/// unset) and `counter` increases by one per allocation. Equality, hashing
/// and ordering all use both fields.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TransactionId {
    time: i64,
    counter: i64,
}

impl TransactionId {
    /// Size of the binary encoding
    pub const ENCODED_LEN: usize = 8;

    pub fn new(time: i64, counter: i64) -> Self {
        Self { time, counter }
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn counter(&self) -> i64 {
        self.counter
    }

    /// Canonical `{time}-{counter}` form
    pub fn encode_to_string(&self) -> String {
        self.to_string()
    }

    /// Inverse of `encode_to_string`; malformed input is a `Parse` error
    pub fn decode_from_string(s: &str) -> Result<Self> {
        const WHAT: &str = "transaction id";
        let [time, counter] = split_fields::<2>(s, WHAT)?;
        Ok(Self::new(
            parse_field(time, s, WHAT)?,
            parse_field(counter, s, WHAT)?,
        ))
    }

    /// Write the fixed 8-byte form
    ///
    /// Both fields must fit in an i32.
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        let time = i32::try_from(self.time).map_err(|_| {
            RedoError::Serialization(format!("transaction time {} exceeds 32 bits", self.time))
        })?;
        let counter = i32::try_from(self.counter).map_err(|_| {
            RedoError::Serialization(format!(
                "transaction counter {} exceeds 32 bits",
                self.counter
            ))
        })?;

        buf.put_i32_le(time);
        buf.put_i32_le(counter);
        Ok(())
    }

    /// Read the fixed 8-byte form
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < Self::ENCODED_LEN {
            return Err(RedoError::Corruption(format!(
                "transaction id: expected {} bytes, got {}",
                Self::ENCODED_LEN,
                buf.remaining()
            )));
        }
        let time = buf.get_i32_le() as i64;
        let counter = buf.get_i32_le() as i64;
        Ok(Self::new(time, counter))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.time, self.counter)
    }
}

impl FromStr for TransactionId {
    type Err = RedoError;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode_from_string(s)
    }
}
