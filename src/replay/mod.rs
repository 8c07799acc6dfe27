//! Replay Module
//!
//! Reads segments back and re-applies committed operations.
//!
//! ## Responsibilities
//! - Pair start records with their commit/abort markers
//! - Crash recovery: replay commits after the store's durable checkpoint,
//!   report transactions that never committed
//! - Restore playback: replay committed ops from chosen segments, filtered
//!   by time and mailbox, serially or on per-mailbox worker threads

mod executor;
mod parallel;
mod playback;
mod player;

pub use executor::{OpExecutor, SerialExecutor};
pub use parallel::ParallelExecutor;
pub use playback::{Playback, PlaybackOptions, PlaybackReport};
pub use player::{PlayerStats, RecoveryReport, RecoveryScan, RedoPlayer, ReplayFilter};
