//! Reserved header region
//!
//! The first two alignment-sized pages of the file each hold a copy of the
//! header: magic, format version, extent alignment, and the location of the
//! durable (checkpointed) translation table, closed by a CRC32. Two copies
//! exist for crash safety: a torn write of one copy leaves the other
//! readable, and the open path falls back to the second copy when the first
//! fails validation.

use crate::allocator::BlockPair;
use crate::error::{BlockError, Result};
use crate::io::BlockFile;
use tracing::warn;

pub const MAGIC: [u8; 8] = *b"FTBT\x00\x02\x00\x00";
pub const VERSION_MAJOR: u16 = 2;
pub const VERSION_MINOR: u16 = 0;

/// Size of one header copy; two copies make up the default reserved region.
pub const HEADER_COPY_SIZE: u64 = 4096;

/// On-disk layout: magic (8), version major/minor (2+2), pad (4),
/// alignment (8), translation offset (8), translation size (8), crc32 (4).
const HEADER_BYTES: usize = 8 + 2 + 2 + 4 + 8 + 8 + 8 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub alignment: u64,
    /// Where the checkpointed translation table lives.
    pub translation: BlockPair,
}

impl Header {
    pub fn new(alignment: u64, translation: BlockPair) -> Self {
        Header {
            alignment,
            translation,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_BYTES);
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&VERSION_MAJOR.to_le_bytes());
        buf.extend_from_slice(&VERSION_MINOR.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(&self.alignment.to_le_bytes());
        buf.extend_from_slice(&self.translation.offset.to_le_bytes());
        buf.extend_from_slice(&self.translation.size.to_le_bytes());
        let checksum = crc32fast::hash(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_BYTES {
            return Err(BlockError::CorruptTranslation(format!(
                "header too short: {} bytes",
                buf.len()
            )));
        }
        let buf = &buf[..HEADER_BYTES];
        let (body, tail) = buf.split_at(HEADER_BYTES - 4);
        let stored = u32::from_le_bytes(tail.try_into().unwrap());
        if crc32fast::hash(body) != stored {
            return Err(BlockError::ChecksumMismatch);
        }
        if body[0..8] != MAGIC {
            return Err(BlockError::InvalidMagic);
        }
        let major = u16::from_le_bytes(body[8..10].try_into().unwrap());
        let minor = u16::from_le_bytes(body[10..12].try_into().unwrap());
        if major != VERSION_MAJOR {
            return Err(BlockError::UnsupportedVersion { major, minor });
        }
        let read_u64 = |at: usize| u64::from_le_bytes(body[at..at + 8].try_into().unwrap());
        Ok(Header {
            alignment: read_u64(16),
            translation: BlockPair::new(read_u64(24), read_u64(32)),
        })
    }

    /// Write both header copies and flush them.
    pub fn write_both(&self, file: &mut BlockFile) -> Result<()> {
        let bytes = self.to_bytes();
        file.write_at(0, &bytes)?;
        file.write_at(HEADER_COPY_SIZE, &bytes)?;
        file.sync()?;
        Ok(())
    }

    /// Read the first valid header copy, preferring copy 0.
    pub fn read_best(file: &mut BlockFile) -> Result<Header> {
        let first = file
            .read_at(0, HEADER_BYTES)
            .and_then(|buf| Header::from_bytes(&buf));
        match first {
            Ok(header) => Ok(header),
            Err(err) => {
                warn!(%err, "primary header copy invalid, trying backup");
                let buf = file.read_at(HEADER_COPY_SIZE, HEADER_BYTES)?;
                Header::from_bytes(&buf)
            }
        }
    }
}
