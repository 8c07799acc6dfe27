//! # redolog
//!
//! Durable redo log for a mailbox server:
//! - Write-ahead logging of every mailbox mutation
//! - Segment rollover into a sequence-numbered archive
//! - Crash recovery that re-applies committed, not-yet-durable operations
//! - Restore playback and replication catch-up tracking
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Protocol Handlers (many)                     │
//! │         op.start() → mutate mailbox → op.log() → commit      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                    RedoLogManager                            │
//! │        (single writer: txn ids, appends, rollover)           │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  redo.log   │─rollover▶│   archive   │
//!   │  (active)   │          │ seq{N}.log  │
//!   └──────┬──────┘          └──────┬──────┘
//!          │                        │
//!          └───────────┬────────────┘
//!                      ▼
//!   ┌──────────────────────────────────────┐
//!   │ RedoPlayer → MailboxStore::redo()    │
//!   │ (crash recovery, playback, catch-up) │
//!   └──────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod txn;
pub mod op;
pub mod wal;
pub mod rollover;
pub mod store;
pub mod manager;
pub mod replay;
pub mod replication;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{RedoConfig, SyncStrategy};
pub use error::{RedoError, Result};
pub use manager::RedoLogManager;
pub use op::{OpData, OpKind, RedoableOp};
pub use store::MailboxStore;
pub use txn::{CommitId, TransactionId};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of the redo log crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
