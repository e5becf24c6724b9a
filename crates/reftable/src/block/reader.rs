//! Parses one already-loaded (and, for log blocks, already-inflated)
//! block payload and provides restart-table seeking.

use super::{BlockType, RESTART_COUNT_LEN, RESTART_ENTRY_LEN};
use crate::error::{ReftableError, Result};
use crate::framing::get_varint;
use std::cmp::Ordering;

/// A parsed block: entries region plus restart table, both addressed by
/// byte offset into `payload` (the block's bytes *without* the 4-byte
/// header).
pub struct Block {
    block_type: BlockType,
    payload: Vec<u8>,
    keys_end: usize,
    restarts: Vec<u32>,
}

impl Block {
    /// Parses `payload` (header-stripped, and for log blocks already
    /// DEFLATE-inflated) into entries region + restart table.
    pub fn parse(block_type: BlockType, payload: Vec<u8>) -> Result<Self> {
        if payload.len() < RESTART_COUNT_LEN {
            return Err(ReftableError::TruncatedRead {
                expected: RESTART_COUNT_LEN,
                got: payload.len(),
            });
        }
        let count_at = payload.len() - RESTART_COUNT_LEN;
        let restart_count =
            u16::from_be_bytes([payload[count_at], payload[count_at + 1]]) as usize;
        let table_bytes = restart_count * RESTART_ENTRY_LEN;
        let keys_end = count_at
            .checked_sub(table_bytes)
            .ok_or_else(|| ReftableError::InvalidBlock("restart table overruns block".into()))?;

        let mut restarts = Vec::with_capacity(restart_count);
        for i in 0..restart_count {
            let o = keys_end + i * RESTART_ENTRY_LEN;
            let offset = (u32::from(payload[o]) << 16)
                | (u32::from(payload[o + 1]) << 8)
                | u32::from(payload[o + 2]);
            restarts.push(offset);
        }

        Ok(Self {
            block_type,
            payload,
            keys_end,
            restarts,
        })
    }

    /// The block's type.
    #[must_use]
    pub fn block_type(&self) -> BlockType {
        self.block_type
    }

    /// Number of restart points.
    #[must_use]
    pub fn restart_count(&self) -> usize {
        self.restarts.len()
    }

    /// Byte offset (into the entries region) of restart point `i`.
    #[must_use]
    pub fn restart_offset(&self, i: usize) -> u32 {
        self.restarts[i]
    }

    /// Offset one past the last byte of the entries region, i.e. where
    /// the first entry begins. Entries always start at `0`.
    #[must_use]
    pub fn keys_end(&self) -> usize {
        self.keys_end
    }

    /// Returns `true` if `pos` is still within the entries region.
    #[must_use]
    pub fn has_more(&self, pos: usize) -> bool {
        pos < self.keys_end
    }

    /// Decodes one entry's key starting at `pos`, reconstructing it
    /// from `prev_key` (the previously decoded key; empty at a restart
    /// point or block start).
    ///
    /// Returns `(key, value_type, value_start)`, where `value_start` is
    /// the offset the caller should pass to a type-specific value
    /// decoder.
    pub fn decode_key(&self, pos: usize, prev_key: &[u8]) -> Result<(Vec<u8>, u8, usize)> {
        let buf = &self.payload[pos..self.keys_end];
        let (prefix_len, n1) = get_varint(buf)?;
        let (suffix_and_type, n2) = get_varint(&buf[n1..])?;
        let suffix_len = (suffix_and_type >> 3) as usize;
        let value_type = (suffix_and_type & 0x7) as u8;
        let prefix_len = prefix_len as usize;
        if prefix_len > prev_key.len() {
            return Err(ReftableError::InvalidBlock(
                "prefixLen exceeds previous key length".into(),
            ));
        }
        let suffix_start = pos + n1 + n2;
        let suffix_end = suffix_start
            .checked_add(suffix_len)
            .filter(|&e| e <= self.keys_end)
            .ok_or_else(|| ReftableError::InvalidBlock("entry suffix overruns block".into()))?;

        let mut key = Vec::with_capacity(prefix_len + suffix_len);
        key.extend_from_slice(&prev_key[..prefix_len]);
        key.extend_from_slice(&self.payload[suffix_start..suffix_end]);
        Ok((key, value_type, suffix_end))
    }

    /// Returns the value-payload bytes available starting at `pos`
    /// (i.e. up to the end of the entries region); type-specific
    /// decoders slice what they need from the front.
    #[must_use]
    pub fn value_bytes(&self, pos: usize) -> &[u8] {
        &self.payload[pos..self.keys_end]
    }

    /// Binary-searches the restart table for the restart point at or
    /// immediately before `key`, returning the entry offset to start a
    /// linear scan from (`0` if `key` precedes every restart key).
    pub fn restart_scan_start(&self, key: &[u8], mut decode_at: impl FnMut(usize) -> Result<Vec<u8>>) -> Result<usize> {
        if self.restarts.is_empty() {
            return Ok(0);
        }
        let (mut lo, mut hi) = (0usize, self.restarts.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let mid_key = decode_at(self.restarts[mid] as usize)?;
            match mid_key.as_slice().cmp(key) {
                Ordering::Less | Ordering::Equal => lo = mid + 1,
                Ordering::Greater => hi = mid,
            }
        }
        Ok(if lo == 0 {
            0
        } else {
            self.restarts[lo - 1] as usize
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockWriter, REF_1ID};

    fn build_block(keys: &[&str]) -> Block {
        let mut w = BlockWriter::new(BlockType::Ref, 4096, 2);
        for k in keys {
            w.add(k.as_bytes(), REF_1ID, &[7u8; 21]).unwrap();
        }
        Block::parse(BlockType::Ref, w.finish()).unwrap()
    }

    #[test]
    fn sequential_decode_reconstructs_all_keys() {
        let keys = ["refs/heads/a", "refs/heads/b", "refs/heads/bb", "refs/tags/v1"];
        let block = build_block(&keys);
        let mut pos = 0;
        let mut prev = Vec::new();
        let mut decoded = Vec::new();
        while block.has_more(pos) {
            let (key, value_type, value_start) = block.decode_key(pos, &prev).unwrap();
            assert_eq!(value_type, REF_1ID);
            decoded.push(String::from_utf8(key.clone()).unwrap());
            prev = key;
            pos = value_start + 21;
        }
        assert_eq!(decoded, keys);
    }

    #[test]
    fn restart_scan_start_finds_candidate_restart() {
        let keys: Vec<String> = (0..40).map(|i| format!("refs/heads/b{i:03}")).collect();
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let block = build_block(&key_refs);
        assert!(block.restart_count() > 1, "expected multiple restarts at interval 2");

        let decode_at = |offset: usize| -> Result<Vec<u8>> {
            let (key, _, _) = block.decode_key(offset, &[])?;
            Ok(key)
        };
        let start = block.restart_scan_start(b"refs/heads/b020", decode_at).unwrap();
        // The candidate restart must not be positioned after the target key.
        let (candidate_key, _, _) = block.decode_key(start, &[]).unwrap();
        assert!(candidate_key.as_slice() <= b"refs/heads/b020".as_slice());
    }
}
