//! Whole-file structure (spec §4.6/§4.7/§6, C6/C7): header, footer, and
//! the section layout every table writer produces and every table
//! reader navigates.

mod reader;
#[cfg(test)]
mod tests;
mod writer;

pub use reader::{LogCursor, RefCursor, TableReader};
pub use writer::{IndexBuilder, TableWriter};

use crate::error::{ReftableError, Result};
use crate::framing::{read_u24, read_u64, write_u24, write_u64};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// 4-byte file magic: ASCII `REFT`.
pub const MAGIC: [u8; 4] = *b"REFT";
/// The only version this implementation writes or reads.
pub const VERSION: u8 = 1;
/// Size in bytes of the file header (and its copy embedded in the footer).
pub const HEADER_LEN: usize = 24;
/// Size in bytes of the footer.
pub const FOOTER_LEN: usize = 68;

/// The 24-byte file header, also embedded verbatim at the start of the
/// footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Configured ref-block size, or `0` if blocks are unaligned.
    pub ref_block_size: u32,
    /// Lower bound of the `updateIndex` range this table covers.
    pub min_update_index: u64,
    /// Upper bound of the `updateIndex` range this table covers.
    pub max_update_index: u64,
}

impl FileHeader {
    /// Serializes the header to its 24-byte on-disk form.
    pub fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&MAGIC);
        out.write_u8(VERSION)?;
        write_u24(out, self.ref_block_size)?;
        write_u64(out, self.min_update_index)?;
        write_u64(out, self.max_update_index)?;
        Ok(())
    }

    /// Parses a header from its 24-byte on-disk form.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(ReftableError::TruncatedRead {
                expected: HEADER_LEN,
                got: buf.len(),
            });
        }
        if buf[0..4] != MAGIC {
            return Err(ReftableError::InvalidMagic);
        }
        let version = buf[4];
        if version != VERSION {
            return Err(ReftableError::InvalidVersion(version));
        }
        let mut cursor = &buf[5..8];
        let ref_block_size = read_u24(&mut cursor)?;
        let mut cursor = &buf[8..16];
        let min_update_index = read_u64(&mut cursor)?;
        let mut cursor = &buf[16..24];
        let max_update_index = read_u64(&mut cursor)?;
        Ok(Self {
            ref_block_size,
            min_update_index,
            max_update_index,
        })
    }
}

/// The 68-byte file footer: header copy plus section offsets and a
/// trailing CRC-32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    /// Copy of the file header.
    pub header: FileHeader,
    /// Root offset of the ref index, or `0` if none.
    pub ref_index_offset: u64,
    /// Start offset of the object section, or `0` if none.
    pub object_offset: u64,
    /// Byte width of object-ID prefixes used as object-section keys.
    pub object_id_len: u8,
    /// Root offset of the object index, or `0` if none.
    pub object_index_offset: u64,
    /// Start offset of the log section, or `0` if none.
    pub log_offset: u64,
    /// Root offset of the log index, or `0` if none.
    pub log_index_offset: u64,
}

impl Footer {
    /// Serializes the footer, computing and appending its trailing
    /// CRC-32 over the preceding 64 bytes.
    pub fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        let start = out.len();
        self.header.write_to(out)?;
        write_u64(out, self.ref_index_offset)?;
        let packed_object = (self.object_offset << 5) | u64::from(self.object_id_len & 0x1f);
        write_u64(out, packed_object)?;
        write_u64(out, self.object_index_offset)?;
        write_u64(out, self.log_offset)?;
        write_u64(out, self.log_index_offset)?;
        let crc = crate::framing::crc32(&out[start..]);
        out.extend_from_slice(&crc.to_be_bytes());
        Ok(())
    }

    /// Parses and CRC-validates a 68-byte footer.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < FOOTER_LEN {
            return Err(ReftableError::TruncatedRead {
                expected: FOOTER_LEN,
                got: buf.len(),
            });
        }
        let crc_declared = (&buf[64..68]).read_u32::<BigEndian>()?;
        let crc_actual = crate::framing::crc32(&buf[0..64]);
        if crc_declared != crc_actual {
            return Err(ReftableError::InvalidCrc);
        }
        let header = FileHeader::parse(&buf[0..24])?;
        let mut cur = &buf[24..32];
        let ref_index_offset = read_u64(&mut cur)?;
        let mut cur = &buf[32..40];
        let packed_object = read_u64(&mut cur)?;
        let object_offset = packed_object >> 5;
        let object_id_len = (packed_object & 0x1f) as u8;
        let mut cur = &buf[40..48];
        let object_index_offset = read_u64(&mut cur)?;
        let mut cur = &buf[48..56];
        let log_offset = read_u64(&mut cur)?;
        let mut cur = &buf[56..64];
        let log_index_offset = read_u64(&mut cur)?;
        Ok(Self {
            header,
            ref_index_offset,
            object_offset,
            object_id_len,
            object_index_offset,
            log_offset,
            log_index_offset,
        })
    }
}

/// Returns the first non-zero candidate offset, or `default` if every
/// candidate is zero. Used to find where a section ends: the next
/// present section's start, or the footer start.
#[must_use]
pub fn first_present_or(candidates: &[u64], default: u64) -> u64 {
    candidates.iter().copied().find(|&v| v != 0).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = FileHeader {
            ref_block_size: 4096,
            min_update_index: 10,
            max_update_index: 42,
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_LEN);
        let parsed = FileHeader::parse(&buf).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn footer_roundtrip_and_crc() {
        let footer = Footer {
            header: FileHeader {
                ref_block_size: 4096,
                min_update_index: 1,
                max_update_index: 1,
            },
            ref_index_offset: 0,
            object_offset: 9000,
            object_id_len: 4,
            object_index_offset: 9500,
            log_offset: 10000,
            log_index_offset: 0,
        };
        let mut buf = Vec::new();
        footer.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), FOOTER_LEN);
        let parsed = Footer::parse(&buf).unwrap();
        assert_eq!(parsed, footer);
    }

    #[test]
    fn footer_rejects_corrupted_crc() {
        let footer = Footer {
            header: FileHeader {
                ref_block_size: 0,
                min_update_index: 0,
                max_update_index: 0,
            },
            ref_index_offset: 0,
            object_offset: 0,
            object_id_len: 0,
            object_index_offset: 0,
            log_offset: 0,
            log_index_offset: 0,
        };
        let mut buf = Vec::new();
        footer.write_to(&mut buf).unwrap();
        *buf.last_mut().unwrap() ^= 0xff;
        assert!(matches!(Footer::parse(&buf), Err(ReftableError::InvalidCrc)));
    }

    #[test]
    fn first_present_or_picks_first_nonzero() {
        assert_eq!(first_present_or(&[0, 0, 42, 7], 99), 42);
        assert_eq!(first_present_or(&[0, 0], 99), 99);
    }
}
