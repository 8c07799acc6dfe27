//! Segment file header

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use bytes::{Buf, BufMut};

use crate::error::{RedoError, Result};

/// Magic bytes identifying a redo log segment
pub const MAGIC: &[u8; 4] = b"RDLG";

/// Current segment format version
pub const FORMAT_VERSION: u16 = 1;

/// Header size in bytes; records start at this offset
pub const HEADER_SIZE: u64 = 64;

/// Bytes covered by the header CRC
const HEADER_BODY_SIZE: usize = 60;

/// Per-segment metadata, rewritten in place when the segment is closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u16,
    /// Set while a writer owns the segment; still set after a crash
    pub open: bool,
    pub sequence: u64,
    /// Epoch millis
    pub create_time: i64,
    /// Timestamp of the first op in the segment, 0 if none
    pub first_op_tstamp: i64,
    /// Timestamp of the last op; only accurate once the segment is closed
    pub last_op_tstamp: i64,
}

impl FileHeader {
    pub fn new(sequence: u64, create_time: i64) -> Self {
        Self {
            version: FORMAT_VERSION,
            open: true,
            sequence,
            create_time,
            first_op_tstamp: 0,
            last_op_tstamp: 0,
        }
    }

    /// Serialize to the fixed 64-byte form
    pub fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut out = [0u8; HEADER_SIZE as usize];
        {
            let mut buf = &mut out[..];
            buf.put_slice(MAGIC);
            buf.put_u16_le(self.version);
            buf.put_u8(self.open as u8);
            buf.put_u8(0);
            buf.put_u64_le(self.sequence);
            buf.put_i64_le(self.create_time);
            buf.put_i64_le(self.first_op_tstamp);
            buf.put_i64_le(self.last_op_tstamp);
        }
        let crc = crc32fast::hash(&out[..HEADER_BODY_SIZE]);
        out[HEADER_BODY_SIZE..].copy_from_slice(&crc.to_le_bytes());
        out
    }

    /// Parse and validate the fixed 64-byte form
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE as usize {
            return Err(RedoError::Corruption(format!(
                "segment header: expected {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        if &bytes[0..4] != MAGIC {
            return Err(RedoError::Corruption(format!(
                "invalid segment magic: {:?}",
                &bytes[0..4]
            )));
        }

        let stored_crc = u32::from_le_bytes([bytes[60], bytes[61], bytes[62], bytes[63]]);
        let computed_crc = crc32fast::hash(&bytes[..HEADER_BODY_SIZE]);
        if stored_crc != computed_crc {
            return Err(RedoError::Corruption(format!(
                "segment header CRC mismatch: stored {:08x}, computed {:08x}",
                stored_crc, computed_crc
            )));
        }

        let mut buf = &bytes[4..HEADER_BODY_SIZE];
        let version = buf.get_u16_le();
        if version != FORMAT_VERSION {
            return Err(RedoError::Corruption(format!(
                "unsupported segment version: {}",
                version
            )));
        }
        let open = buf.get_u8() != 0;
        buf.advance(1);

        Ok(Self {
            version,
            open,
            sequence: buf.get_u64_le(),
            create_time: buf.get_i64_le(),
            first_op_tstamp: buf.get_i64_le(),
            last_op_tstamp: buf.get_i64_le(),
        })
    }

    /// Read the header of the segment at `path`
    pub fn read_from(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        Self::read(&mut file)
    }

    pub(crate) fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut bytes = [0u8; HEADER_SIZE as usize];
        reader.read_exact(&mut bytes).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                RedoError::Corruption("segment shorter than its header".to_string())
            } else {
                RedoError::Io(e)
            }
        })?;
        Self::decode(&bytes)
    }

    /// Overwrite the header at offset 0, leaving the cursor at end of file
    pub(crate) fn write_to(&self, file: &mut File) -> Result<()> {
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&self.encode())?;
        file.seek(SeekFrom::End(0))?;
        Ok(())
    }
}
