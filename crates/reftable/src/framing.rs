//! Framing primitives: the reftable varint flavour, fixed
//! big-endian integers, object-ID serialization, and CRC-32.
//!
//! The varint here is *not* LEB128/Protobuf-style: every continuation
//! step re-biases the accumulated value by `+1` before shifting in the
//! next 7 bits. This lets every encodable value round-trip through a
//! unique, minimal-length byte sequence with no redundant encodings for
//! zero.

use crate::error::{ReftableError, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Write};

/// Width in bytes of an object ID. Treated as opaque; nothing here
/// assumes a specific hash function.
pub const OBJECT_ID_LEN: usize = 20;

/// A fixed-width, opaque object identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub [u8; OBJECT_ID_LEN]);

impl ObjectId {
    /// The all-zero object ID, used as a sentinel for "no object".
    pub const ZERO: ObjectId = ObjectId([0u8; OBJECT_ID_LEN]);

    /// Builds an `ObjectId` from a byte slice of exactly
    /// [`OBJECT_ID_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != OBJECT_ID_LEN {
            return Err(ReftableError::InvalidBlock(format!(
                "object id must be {OBJECT_ID_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut buf = [0u8; OBJECT_ID_LEN];
        buf.copy_from_slice(bytes);
        Ok(ObjectId(buf))
    }

    /// Returns `true` if this is the all-zero sentinel.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; OBJECT_ID_LEN]
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; OBJECT_ID_LEN] {
        &self.0
    }

    /// Writes the raw 20-byte value to `w`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.0)
    }
}

/// Encodes `value` as a reftable varint and appends it to `out`.
///
/// Bytes are produced most-significant-group first; every group but the
/// last has its high bit set. Groups after the first are biased by `-1`
/// on encode (matching the `+1` bias the decoder applies), which is what
/// makes every non-negative `u64` round-trip to a unique byte sequence.
pub fn put_varint(out: &mut Vec<u8>, mut value: u64) {
    let mut tmp = [0u8; 10];
    let mut n = tmp.len() - 1;
    tmp[n] = (value & 0x7f) as u8;
    value >>= 7;
    while value != 0 {
        value -= 1;
        n -= 1;
        tmp[n] = 0x80 | (value & 0x7f) as u8;
        value >>= 7;
    }
    out.extend_from_slice(&tmp[n..]);
}

/// Decodes a reftable varint from the start of `buf`.
///
/// Returns `(value, bytes_consumed)`. Errors with
/// [`ReftableError::InvalidBlock`] if `buf` is exhausted before a
/// terminating (high-bit-clear) byte is seen.
pub fn get_varint(buf: &[u8]) -> Result<(u64, usize)> {
    let mut iter = buf.iter();
    let first = *iter
        .next()
        .ok_or_else(|| ReftableError::InvalidBlock("varint: buffer underflow".into()))?;
    let mut val = (first & 0x7f) as u64;
    let mut consumed = 1;
    let mut cont = first & 0x80 != 0;
    while cont {
        let next = *iter
            .next()
            .ok_or_else(|| ReftableError::InvalidBlock("varint: buffer underflow".into()))?;
        consumed += 1;
        val += 1;
        val = (val << 7) | (next & 0x7f) as u64;
        cont = next & 0x80 != 0;
    }
    Ok((val, consumed))
}

/// Returns the number of bytes [`put_varint`] would emit for `value`,
/// without allocating.
#[must_use]
pub fn varint_len(mut value: u64) -> usize {
    let mut len = 1;
    value >>= 7;
    while value != 0 {
        value -= 1;
        len += 1;
        value >>= 7;
    }
    len
}

/// Reads a big-endian `u24` (the block-length / restart-offset width).
pub fn read_u24<R: ReadBytesExt>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 3];
    r.read_exact(&mut buf)?;
    Ok(u32::from(buf[0]) << 16 | u32::from(buf[1]) << 8 | u32::from(buf[2]))
}

/// Writes `value` as a big-endian `u24`. The caller must ensure
/// `value <= 0x00ff_ffff`.
pub fn write_u24<W: WriteBytesExt>(w: &mut W, value: u32) -> io::Result<()> {
    debug_assert!(value <= 0x00ff_ffff, "u24 overflow: {value}");
    let buf = [
        ((value >> 16) & 0xff) as u8,
        ((value >> 8) & 0xff) as u8,
        (value & 0xff) as u8,
    ];
    w.write_all(&buf)
}

/// Reads a big-endian `u16`.
pub fn read_u16<R: ReadBytesExt>(r: &mut R) -> io::Result<u16> {
    r.read_u16::<BigEndian>()
}

/// Writes a big-endian `u16`.
pub fn write_u16<W: WriteBytesExt>(w: &mut W, value: u16) -> io::Result<()> {
    w.write_u16::<BigEndian>(value)
}

/// Reads a big-endian `u32`.
pub fn read_u32<R: ReadBytesExt>(r: &mut R) -> io::Result<u32> {
    r.read_u32::<BigEndian>()
}

/// Writes a big-endian `u32`.
pub fn write_u32<W: WriteBytesExt>(w: &mut W, value: u32) -> io::Result<()> {
    w.write_u32::<BigEndian>(value)
}

/// Reads a big-endian `u64`.
pub fn read_u64<R: ReadBytesExt>(r: &mut R) -> io::Result<u64> {
    r.read_u64::<BigEndian>()
}

/// Writes a big-endian `u64`.
pub fn write_u64<W: WriteBytesExt>(w: &mut W, value: u64) -> io::Result<()> {
    w.write_u64::<BigEndian>(value)
}

/// Computes the IEEE CRC-32 of `data`.
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_roundtrip_small_values() {
        for v in 0..2000u64 {
            let mut buf = Vec::new();
            put_varint(&mut buf, v);
            let (decoded, consumed) = get_varint(&buf).unwrap();
            assert_eq!(decoded, v);
            assert_eq!(consumed, buf.len());
            assert_eq!(varint_len(v), buf.len());
        }
    }

    #[test]
    fn varint_roundtrip_large_values() {
        let values = [
            0u64,
            1,
            127,
            128,
            16384,
            u32::MAX as u64,
            u64::MAX,
            u64::MAX - 1,
            1u64 << 40,
        ];
        for &v in &values {
            let mut buf = Vec::new();
            put_varint(&mut buf, v);
            let (decoded, consumed) = get_varint(&buf).unwrap();
            assert_eq!(decoded, v, "roundtrip failed for {v}");
            assert_eq!(consumed, buf.len());
        }
    }

    #[test]
    fn varint_underflow_errors() {
        let mut buf = Vec::new();
        put_varint(&mut buf, 1u64 << 40);
        buf.truncate(buf.len() - 1);
        assert!(get_varint(&buf).is_err());
    }

    #[test]
    fn u24_roundtrip() {
        let mut buf = Vec::new();
        write_u24(&mut buf, 0x00ab_cdef & 0x00ff_ffff).unwrap();
        let mut cursor = &buf[..];
        let v = read_u24(&mut cursor).unwrap();
        assert_eq!(v, 0x00ab_cdef & 0x00ff_ffff);
    }

    #[test]
    fn object_id_from_slice_rejects_wrong_length() {
        assert!(ObjectId::from_slice(&[0u8; 19]).is_err());
        assert!(ObjectId::from_slice(&[0u8; 20]).is_ok());
    }
}
