//! Output stream: turns finished block payloads into
//! framed, optionally compressed, optionally padded bytes on the wire.

use crate::block::{pack_header, BlockType};
use crate::error::Result;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::Write;

/// Wraps a sequential sink, framing each block with its header and
/// applying the type-specific on-disk transform (DEFLATE for log
/// blocks, padding for block alignment).
pub struct OutputStream<W: Write> {
    sink: W,
    align_to: Option<u32>,
    bytes_written: u64,
    padding_written: u64,
}

impl<W: Write> OutputStream<W> {
    /// Wraps `sink`. When `align_to` is `Some(n)`, [`Self::pad_to_next_block`]
    /// pads with zero bytes up to the next multiple of `n`.
    #[must_use]
    pub fn new(sink: W, align_to: Option<u32>) -> Self {
        Self {
            sink,
            align_to,
            bytes_written: 0,
            padding_written: 0,
        }
    }

    /// Total bytes written so far, including padding.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Bytes spent on alignment padding so far.
    #[must_use]
    pub fn padding_written(&self) -> u64 {
        self.padding_written
    }

    /// Writes one finished block: `payload` is a [`crate::block::BlockWriter::finish`]
    /// result (entries + restart table + restart count, no header).
    /// Log blocks are DEFLATE-compressed after the header is accounted
    /// for; all other block types are written verbatim.
    ///
    /// Returns the file offset the block was written at.
    pub fn write_block(&mut self, block_type: BlockType, payload: &[u8]) -> Result<u64> {
        let offset = self.bytes_written;
        let body = if block_type == BlockType::Log {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(payload)?;
            encoder.finish()?
        } else {
            payload.to_vec()
        };

        let header = pack_header(block_type, body.len() as u32);
        self.sink.write_all(&header)?;
        self.sink.write_all(&body)?;
        self.bytes_written += (header.len() + body.len()) as u64;
        Ok(offset)
    }

    /// Pads with zero bytes to the next multiple of the configured
    /// alignment, if alignment is enabled. A no-op otherwise.
    pub fn pad_to_next_block(&mut self) -> Result<()> {
        let Some(align) = self.align_to else {
            return Ok(());
        };
        let align = u64::from(align);
        if align == 0 {
            return Ok(());
        }
        let remainder = self.bytes_written % align;
        if remainder == 0 {
            return Ok(());
        }
        let pad = align - remainder;
        let zeros = vec![0u8; pad as usize];
        self.sink.write_all(&zeros)?;
        self.bytes_written += pad;
        self.padding_written += pad;
        Ok(())
    }

    /// Writes raw bytes directly to the sink, bypassing block framing.
    /// Used for the file header and footer.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.sink.write_all(bytes)?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    /// Consumes the stream, returning the underlying sink.
    pub fn into_inner(self) -> W {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockWriter, REF_1ID};

    #[test]
    fn non_log_block_is_written_verbatim() {
        let mut w = BlockWriter::new(BlockType::Ref, 4096, 16);
        w.add(b"refs/heads/a", REF_1ID, &[9u8; 21]).unwrap();
        let payload = w.finish();

        let mut out = OutputStream::new(Vec::new(), None);
        let offset = out.write_block(BlockType::Ref, &payload).unwrap();
        assert_eq!(offset, 0);
        let bytes = out.into_inner();
        assert_eq!(bytes.len(), 4 + payload.len());
        assert_eq!(bytes[0], b'r');
    }

    #[test]
    fn log_block_is_deflate_compressed() {
        let mut w = BlockWriter::new(BlockType::Log, 8192, 16);
        w.add(b"refs/heads/a\x00\xff\xff\xff\xff\xff\xff\xff\xff", 0, &[])
            .unwrap();
        let payload = w.finish();

        let mut out = OutputStream::new(Vec::new(), None);
        out.write_block(BlockType::Log, &payload).unwrap();
        let bytes = out.into_inner();
        assert_eq!(bytes[0], b'g');
        // Compressed length must be readable back out of the header.
        let declared_len =
            (u32::from(bytes[1]) << 16) | (u32::from(bytes[2]) << 8) | u32::from(bytes[3]);
        assert_eq!(bytes.len(), 4 + declared_len as usize);
    }

    #[test]
    fn padding_rounds_up_to_alignment() {
        let mut out = OutputStream::new(Vec::new(), Some(16));
        out.write_raw(&[1, 2, 3]).unwrap();
        out.pad_to_next_block().unwrap();
        assert_eq!(out.bytes_written(), 16);
        assert_eq!(out.padding_written(), 13);
        // Already-aligned writes pad nothing further.
        out.pad_to_next_block().unwrap();
        assert_eq!(out.padding_written(), 13);
    }
}
