//! Transaction and Commit Identity
//!
//! Value types that name a logical mailbox transaction and the durable
//! point at which it committed.
//!
//! ## Text Encodings
//! ```text
//! TransactionId: {time}-{counter}                      e.g. 1112-5
//! CommitId:      {redoSeq}-{timestamp}-{time}-{counter} e.g. 4-1-2-3
//! ```
//!
//! ## Binary Encodings (little-endian)
//! ```text
//! TransactionId: ┌──────────┬─────────────┐
//!                │ time i32 │ counter i32 │            8 bytes
//!                └──────────┴─────────────┘
//! CommitId:      ┌──────────┬──────────────┬────────┐
//!                │ seq u64  │ tstamp i64   │ txn(8) │  24 bytes
//!                └──────────┴──────────────┴────────┘
//! ```
//! Changing either layout breaks every archived segment.

mod commit_id;
mod generator;
mod transaction_id;

pub use commit_id::CommitId;
pub use generator::TxnIdGenerator;
pub use transaction_id::TransactionId;

use std::fmt;
use std::str::FromStr;

use crate::error::{RedoError, Result};

/// Split a dash-separated text id into exactly `N` unsigned decimal fields
fn split_fields<'a, const N: usize>(s: &'a str, what: &str) -> Result<[&'a str; N]> {
    let invalid = || RedoError::Parse(format!("invalid {}: {:?}", what, s));
    let mut fields = [""; N];
    let mut parts = s.split('-');

    for slot in fields.iter_mut() {
        let part = parts.next().ok_or_else(invalid)?;
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        *slot = part;
    }

    if parts.next().is_some() {
        return Err(invalid());
    }

    Ok(fields)
}

/// Parse one field returned by `split_fields` as its own integer type
fn parse_field<T>(field: &str, s: &str, what: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    field
        .parse()
        .map_err(|e| RedoError::Parse(format!("invalid {} {:?}: {}", what, s, e)))
}
