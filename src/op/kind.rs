//! Operation type tags
//!
//! Every record carries one of these as a u16. The codes are part of the
//! on-disk format: never renumber, only append.

use std::fmt;

use crate::error::{RedoError, Result};

/// Closed set of record kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum OpKind {
    // -------------------------------------------------------------------------
    // Log markers
    // -------------------------------------------------------------------------
    Checkpoint = 1,
    CommitTxn = 2,
    AbortTxn = 3,

    // -------------------------------------------------------------------------
    // Mailbox mutations
    // -------------------------------------------------------------------------
    CreateMailbox = 10,
    DeleteMailbox = 11,
    CreateFolder = 12,
    RenameItem = 13,
    MoveItems = 14,
    DeleteItems = 15,
    CreateMessage = 16,
    StoreIncomingBlob = 17,
    SetItemTags = 18,
}

impl OpKind {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Result<Self> {
        let kind = match code {
            1 => OpKind::Checkpoint,
            2 => OpKind::CommitTxn,
            3 => OpKind::AbortTxn,
            10 => OpKind::CreateMailbox,
            11 => OpKind::DeleteMailbox,
            12 => OpKind::CreateFolder,
            13 => OpKind::RenameItem,
            14 => OpKind::MoveItems,
            15 => OpKind::DeleteItems,
            16 => OpKind::CreateMessage,
            17 => OpKind::StoreIncomingBlob,
            18 => OpKind::SetItemTags,
            _ => {
                return Err(RedoError::Corruption(format!(
                    "unknown op type: {}",
                    code
                )))
            }
        };
        Ok(kind)
    }

    /// Mutations open a transaction
    pub fn is_start_marker(self) -> bool {
        !matches!(
            self,
            OpKind::Checkpoint | OpKind::CommitTxn | OpKind::AbortTxn
        )
    }

    /// Commit and abort close one
    pub fn is_end_marker(self) -> bool {
        matches!(self, OpKind::CommitTxn | OpKind::AbortTxn)
    }

    /// Mutations that remove data (skippable during restore playback)
    pub fn is_delete_op(self) -> bool {
        matches!(self, OpKind::DeleteMailbox | OpKind::DeleteItems)
    }

    pub fn name(self) -> &'static str {
        match self {
            OpKind::Checkpoint => "Checkpoint",
            OpKind::CommitTxn => "CommitTxn",
            OpKind::AbortTxn => "AbortTxn",
            OpKind::CreateMailbox => "CreateMailbox",
            OpKind::DeleteMailbox => "DeleteMailbox",
            OpKind::CreateFolder => "CreateFolder",
            OpKind::RenameItem => "RenameItem",
            OpKind::MoveItems => "MoveItems",
            OpKind::DeleteItems => "DeleteItems",
            OpKind::CreateMessage => "CreateMessage",
            OpKind::StoreIncomingBlob => "StoreIncomingBlob",
            OpKind::SetItemTags => "SetItemTags",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
