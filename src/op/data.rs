//! Operation payloads
//!
//! Each kind has its own payload struct, bincode-encoded on its own so
//! the type tag alone selects the decoder.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::txn::TransactionId;

use super::OpKind;

/// Upper bound on a StoreIncomingBlob recipient list
pub const MAX_MAILBOX_LIST_LENGTH: usize = 1_000_000;

// =============================================================================
// Marker Payloads
// =============================================================================

/// Transactions still open when a segment was rolled over
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub active_txns: Vec<TransactionId>,
}

/// Commit or abort of a transaction; remembers what kind of op it ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnEnd {
    pub op_code: u16,
}

// =============================================================================
// Mutation Payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMailbox {
    pub account_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteMailbox;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateFolder {
    pub folder_id: i32,
    pub parent_id: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameItem {
    pub item_id: i32,
    pub folder_id: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveItems {
    pub item_ids: Vec<i32>,
    pub target_folder_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteItems {
    pub item_ids: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMessage {
    pub item_id: i32,
    pub folder_id: i32,
    /// Content digest of the blob holding the message bytes
    pub digest: String,
    pub size: u64,
    pub received_date: i64,
    pub flags: u32,
    pub tags: Vec<String>,
}

/// Message bytes delivered once for several recipient mailboxes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreIncomingBlob {
    pub digest: String,
    pub path: String,
    /// Original, uncompressed size
    pub msg_size: u64,
    pub mailbox_ids: Vec<i32>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetItemTags {
    pub item_ids: Vec<i32>,
    pub flags: u32,
    pub tags: Vec<String>,
}

// =============================================================================
// OpData
// =============================================================================

/// Kind-specific contents of a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpData {
    Checkpoint(Checkpoint),
    CommitTxn(TxnEnd),
    AbortTxn(TxnEnd),
    CreateMailbox(CreateMailbox),
    DeleteMailbox(DeleteMailbox),
    CreateFolder(CreateFolder),
    RenameItem(RenameItem),
    MoveItems(MoveItems),
    DeleteItems(DeleteItems),
    CreateMessage(CreateMessage),
    StoreIncomingBlob(StoreIncomingBlob),
    SetItemTags(SetItemTags),
}

impl OpData {
    pub fn kind(&self) -> OpKind {
        match self {
            OpData::Checkpoint(_) => OpKind::Checkpoint,
            OpData::CommitTxn(_) => OpKind::CommitTxn,
            OpData::AbortTxn(_) => OpKind::AbortTxn,
            OpData::CreateMailbox(_) => OpKind::CreateMailbox,
            OpData::DeleteMailbox(_) => OpKind::DeleteMailbox,
            OpData::CreateFolder(_) => OpKind::CreateFolder,
            OpData::RenameItem(_) => OpKind::RenameItem,
            OpData::MoveItems(_) => OpKind::MoveItems,
            OpData::DeleteItems(_) => OpKind::DeleteItems,
            OpData::CreateMessage(_) => OpKind::CreateMessage,
            OpData::StoreIncomingBlob(_) => OpKind::StoreIncomingBlob,
            OpData::SetItemTags(_) => OpKind::SetItemTags,
        }
    }

    /// Encode just the payload (the type tag is written by the record framer)
    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            OpData::Checkpoint(d) => bincode::serialize(d)?,
            OpData::CommitTxn(d) | OpData::AbortTxn(d) => bincode::serialize(d)?,
            OpData::CreateMailbox(d) => bincode::serialize(d)?,
            OpData::DeleteMailbox(d) => bincode::serialize(d)?,
            OpData::CreateFolder(d) => bincode::serialize(d)?,
            OpData::RenameItem(d) => bincode::serialize(d)?,
            OpData::MoveItems(d) => bincode::serialize(d)?,
            OpData::DeleteItems(d) => bincode::serialize(d)?,
            OpData::CreateMessage(d) => bincode::serialize(d)?,
            OpData::StoreIncomingBlob(d) => bincode::serialize(d)?,
            OpData::SetItemTags(d) => bincode::serialize(d)?,
        };
        Ok(bytes)
    }

    /// Decode a payload written for `kind`
    pub fn decode(kind: OpKind, bytes: &[u8]) -> Result<Self> {
        let data = match kind {
            OpKind::Checkpoint => OpData::Checkpoint(bincode::deserialize(bytes)?),
            OpKind::CommitTxn => OpData::CommitTxn(bincode::deserialize(bytes)?),
            OpKind::AbortTxn => OpData::AbortTxn(bincode::deserialize(bytes)?),
            OpKind::CreateMailbox => OpData::CreateMailbox(bincode::deserialize(bytes)?),
            OpKind::DeleteMailbox => OpData::DeleteMailbox(bincode::deserialize(bytes)?),
            OpKind::CreateFolder => OpData::CreateFolder(bincode::deserialize(bytes)?),
            OpKind::RenameItem => OpData::RenameItem(bincode::deserialize(bytes)?),
            OpKind::MoveItems => OpData::MoveItems(bincode::deserialize(bytes)?),
            OpKind::DeleteItems => OpData::DeleteItems(bincode::deserialize(bytes)?),
            OpKind::CreateMessage => OpData::CreateMessage(bincode::deserialize(bytes)?),
            OpKind::StoreIncomingBlob => {
                let blob: StoreIncomingBlob = bincode::deserialize(bytes)?;
                if blob.mailbox_ids.len() > MAX_MAILBOX_LIST_LENGTH {
                    return Err(crate::RedoError::Corruption(format!(
                        "mailbox list too large ({})",
                        blob.mailbox_ids.len()
                    )));
                }
                OpData::StoreIncomingBlob(blob)
            }
            OpKind::SetItemTags => OpData::SetItemTags(bincode::deserialize(bytes)?),
        };
        Ok(data)
    }
}
