//! Record framing
//!
//! ```text
//! ┌────────┬────────┬──────────┬──────────┬───────────┬──────────┬──────┐
//! │Len (4) │CRC (4) │ Type (2) │ TxnId(8) │ Tstamp(8) │ Mbox (4) │ Data │
//! └────────┴────────┴──────────┴──────────┴───────────┴──────────┴──────┘
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{RedoError, Result};
use crate::op::{OpData, OpKind, RedoableOp};
use crate::txn::TransactionId;

/// Len + CRC
pub const RECORD_PREFIX_SIZE: usize = 8;

/// Type + TxnId + Tstamp + Mbox
const FIXED_BODY_SIZE: usize = 2 + TransactionId::ENCODED_LEN + 8 + 4;

/// Largest record body accepted on read (guards against a corrupt length)
pub const MAX_RECORD_SIZE: u32 = 128 * 1024 * 1024;

/// A decoded record and where it sits in its segment
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub op: RedoableOp,
    /// File offset of the record's length prefix
    pub offset: u64,
    /// Total encoded size including the prefix
    pub len: u64,
}

impl LogRecord {
    /// Offset just past this record
    pub fn end_offset(&self) -> u64 {
        self.offset + self.len
    }
}

/// Encode an op into a framed record
pub fn encode_record(op: &RedoableOp) -> Result<Bytes> {
    let txn_id = op.txn_id().ok_or_else(|| {
        RedoError::InvalidState(format!("op {} has no transaction id", op.kind()))
    })?;
    let data = op.data().encode()?;

    let body_len = FIXED_BODY_SIZE + data.len();
    if body_len > MAX_RECORD_SIZE as usize {
        return Err(RedoError::Serialization(format!(
            "record too large: {} bytes (max {})",
            body_len, MAX_RECORD_SIZE
        )));
    }

    let mut body = BytesMut::with_capacity(body_len);
    body.put_u16_le(op.kind().code());
    txn_id.encode(&mut body)?;
    body.put_i64_le(op.timestamp());
    body.put_i32_le(op.mailbox_id());
    body.put_slice(&data);

    let crc = crc32fast::hash(&body);

    let mut record = BytesMut::with_capacity(RECORD_PREFIX_SIZE + body_len);
    record.put_u32_le(body_len as u32);
    record.put_u32_le(crc);
    record.put_slice(&body);

    Ok(record.freeze())
}

/// Decode the part of a record after its length/CRC prefix
pub fn decode_record_body(body: &[u8]) -> Result<RedoableOp> {
    if body.len() < FIXED_BODY_SIZE {
        return Err(RedoError::Corruption(format!(
            "record body too short: {} bytes",
            body.len()
        )));
    }

    let mut buf = body;
    let kind = OpKind::from_code(buf.get_u16_le())?;
    let txn_id = TransactionId::decode(&mut buf)?;
    let timestamp = buf.get_i64_le();
    let mailbox_id = buf.get_i32_le();
    let data = OpData::decode(kind, buf)?;

    Ok(RedoableOp::decoded(data, mailbox_id, txn_id, timestamp))
}
