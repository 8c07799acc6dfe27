//! Error types for the redo log
//!
//! Provides a unified error type for all operations.
//!
//! ## Severity
//! - Decode errors (`Parse`, `Corruption`, `Serialization`) are local and
//!   recoverable: the caller gets a typed failure, never a default value.
//! - Durability errors (`LogWrite`, `Rollover`, `Replay`, `Halted`) are
//!   fatal: the in-memory mailbox may already be ahead of the log.
//! - `Replication` errors only degrade catch-up status reporting.

use thiserror::Error;

/// Result type alias using RedoError
pub type Result<T> = std::result::Result<T, RedoError>;

/// Unified error type for redo log operations
#[derive(Debug, Error)]
pub enum RedoError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Decode Errors
    // -------------------------------------------------------------------------
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Log corruption detected: {0}")]
    Corruption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Durability Errors (fatal)
    // -------------------------------------------------------------------------
    #[error("Redo log write failed: {0}")]
    LogWrite(String),

    #[error("Redo log rollover failed: {0}")]
    Rollover(String),

    #[error("Redo log replay failed: {0}")]
    Replay(String),

    #[error("Redo log manager halted after a fatal error")]
    Halted,

    // -------------------------------------------------------------------------
    // Collaborator Errors
    // -------------------------------------------------------------------------
    #[error("Mailbox store error: {0}")]
    Store(String),

    #[error("Replication error: {0}")]
    Replication(String),

    // -------------------------------------------------------------------------
    // Usage Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Transaction id space exhausted")]
    TxnIdExhausted,
}

impl RedoError {
    /// True for failures after which the manager must stop serving mutations
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RedoError::LogWrite(_)
                | RedoError::Rollover(_)
                | RedoError::Replay(_)
                | RedoError::Halted
        )
    }
}

impl From<bincode::Error> for RedoError {
    fn from(e: bincode::Error) -> Self {
        RedoError::Serialization(e.to_string())
    }
}
