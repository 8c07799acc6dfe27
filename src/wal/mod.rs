//! Redo Log Segment Files
//!
//! Physical layout of one segment (the active `redo.log` or an archived
//! `redo-{millis}-seq{N}.log`).
//!
//! ## Responsibilities
//! - Fixed header with sequence number and clean-shutdown flag
//! - Length-prefixed, CRC32-checked records
//! - Append with configurable fsync
//! - Sequential read-back and torn-tail detection
//!
//! ## File Format
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │ Header (64 bytes)                                         │
//! │   Magic "RDLG" (4) │ Version (2) │ Open (1) │ Pad (1)     │
//! │   Sequence (8) │ CreateTime (8) │ FirstOp (8) │ LastOp (8) │
//! │   Reserved (20) │ HeaderCRC (4)                           │
//! ├───────────────────────────────────────────────────────────┤
//! │ Record 1                                                  │
//! │ ┌────────┬────────┬──────────┬─────────┬────────┬──────┬──────┐
//! │ │Len (4) │CRC (4) │ Type (2) │ Txn (8) │ TS (8) │Mbox 4│ Data │
//! │ └────────┴────────┴──────────┴─────────┴────────┴──────┴──────┘
//! ├───────────────────────────────────────────────────────────┤
//! │ Record 2 ...                                              │
//! └───────────────────────────────────────────────────────────┘
//! ```
//! `Len` counts the bytes after the CRC; the CRC covers the same bytes.

mod header;
mod reader;
mod record;
mod scan;
mod writer;

pub use header::{FileHeader, FORMAT_VERSION, HEADER_SIZE, MAGIC};
pub use reader::{LogIterator, LogReader};
pub use record::{decode_record_body, encode_record, LogRecord, MAX_RECORD_SIZE, RECORD_PREFIX_SIZE};
pub use scan::{LogScanner, ScanResult, TailPolicy};
pub use writer::LogWriter;
pub(crate) use writer::{seal_segment, sync_parent_dir};
