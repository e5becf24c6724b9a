//! Per-block-type value encodings.

use crate::error::{ReftableError, Result};
use crate::framing::{get_varint, put_varint, ObjectId, OBJECT_ID_LEN};
use crate::record::{LogData, ObjectListValue, RefValue};

/// Ref value type: deletion tombstone.
pub const REF_NONE: u8 = 0;
/// Ref value type: one object ID.
pub const REF_1ID: u8 = 1;
/// Ref value type: two object IDs (tag, peeled target).
pub const REF_2ID: u8 = 2;
/// Ref value type: symbolic target name.
pub const REF_SYMREF: u8 = 3;

/// Log value type: deletion/shadow marker.
pub const LOG_NONE: u8 = 0;
/// Log value type: a live reflog entry.
pub const LOG_DATA: u8 = 1;

fn put_varint_string(out: &mut Vec<u8>, s: &str) {
    put_varint(out, s.len() as u64);
    out.extend_from_slice(s.as_bytes());
}

fn get_varint_string(buf: &[u8]) -> Result<(String, usize)> {
    let (len, n) = get_varint(buf)?;
    let len = len as usize;
    let start = n;
    let end = start
        .checked_add(len)
        .filter(|&e| e <= buf.len())
        .ok_or_else(|| ReftableError::InvalidBlock("varint-string: buffer underflow".into()))?;
    let s = String::from_utf8(buf[start..end].to_vec())
        .map_err(|e| ReftableError::InvalidBlock(format!("invalid utf-8 string: {e}")))?;
    Ok((s, end))
}

/// Encodes a ref's value, returning the value-type nibble to pack into
/// `suffixAndType`.
pub fn encode_ref_value(out: &mut Vec<u8>, update_index_delta: u64, value: &RefValue) -> u8 {
    put_varint(out, update_index_delta);
    match value {
        RefValue::Deletion => REF_NONE,
        RefValue::Unpeeled(id) => {
            out.extend_from_slice(id.as_bytes());
            REF_1ID
        }
        RefValue::Peeled { tag, target } => {
            out.extend_from_slice(tag.as_bytes());
            out.extend_from_slice(target.as_bytes());
            REF_2ID
        }
        RefValue::Symbolic(target) => {
            put_varint_string(out, target);
            REF_SYMREF
        }
    }
}

/// Decodes a ref value given its type nibble. Returns
/// `(updateIndexDelta, value, bytes consumed)`.
pub fn decode_ref_value(buf: &[u8], value_type: u8) -> Result<(u64, RefValue, usize)> {
    let (delta, mut pos) = get_varint(buf)?;
    let value = match value_type {
        REF_NONE => RefValue::Deletion,
        REF_1ID => {
            let id = ObjectId::from_slice(get_slice(buf, pos, OBJECT_ID_LEN)?)?;
            pos += OBJECT_ID_LEN;
            RefValue::Unpeeled(id)
        }
        REF_2ID => {
            let tag = ObjectId::from_slice(get_slice(buf, pos, OBJECT_ID_LEN)?)?;
            pos += OBJECT_ID_LEN;
            let target = ObjectId::from_slice(get_slice(buf, pos, OBJECT_ID_LEN)?)?;
            pos += OBJECT_ID_LEN;
            RefValue::Peeled { tag, target }
        }
        REF_SYMREF => {
            let (target, used) = get_varint_string(&buf[pos..])?;
            pos += used;
            RefValue::Symbolic(target)
        }
        other => {
            return Err(ReftableError::InvalidBlock(format!(
                "unknown ref value type {other}"
            )))
        }
    };
    Ok((delta, value, pos))
}

/// Encodes a reflog entry's value. Returns the value-type nibble.
pub fn encode_log_value(out: &mut Vec<u8>, data: Option<&LogData>) -> u8 {
    match data {
        None => LOG_NONE,
        Some(d) => {
            out.extend_from_slice(d.old_id.as_bytes());
            out.extend_from_slice(d.new_id.as_bytes());
            put_varint_string(out, &d.name);
            put_varint_string(out, &d.email);
            put_varint(out, d.time_secs);
            out.extend_from_slice(&d.tz_minutes.to_be_bytes());
            put_varint_string(out, &d.message);
            LOG_DATA
        }
    }
}

/// Decodes a reflog entry's value given its type nibble. Returns
/// `(data, bytes consumed)`.
pub fn decode_log_value(buf: &[u8], value_type: u8) -> Result<(Option<LogData>, usize)> {
    if value_type == LOG_NONE {
        return Ok((None, 0));
    }
    if value_type != LOG_DATA {
        return Err(ReftableError::InvalidBlock(format!(
            "unknown log value type {value_type}"
        )));
    }
    let mut pos = 0;
    let old_id = ObjectId::from_slice(get_slice(buf, pos, OBJECT_ID_LEN)?)?;
    pos += OBJECT_ID_LEN;
    let new_id = ObjectId::from_slice(get_slice(buf, pos, OBJECT_ID_LEN)?)?;
    pos += OBJECT_ID_LEN;
    let (name, used) = get_varint_string(&buf[pos..])?;
    pos += used;
    let (email, used) = get_varint_string(&buf[pos..])?;
    pos += used;
    let (time_secs, used) = get_varint(&buf[pos..])?;
    pos += used;
    let tz_bytes = get_slice(buf, pos, 2)?;
    let tz_minutes = i16::from_be_bytes([tz_bytes[0], tz_bytes[1]]);
    pos += 2;
    let (message, used) = get_varint_string(&buf[pos..])?;
    pos += used;
    Ok((
        Some(LogData {
            old_id,
            new_id,
            name,
            email,
            time_secs,
            tz_minutes,
            message,
        }),
        pos,
    ))
}

/// Encodes an object-index value (a position list, or the empty list
/// meaning "scan required"). Returns the value-type nibble: `1..=7` for
/// an inline small list, `0` when the count is varint-encoded first.
pub fn encode_object_value(out: &mut Vec<u8>, value: &ObjectListValue) -> u8 {
    match value {
        ObjectListValue::ScanRequired => {
            put_varint(out, 0);
            0
        }
        ObjectListValue::Positions(positions) => {
            let count = positions.len();
            if (1..=7).contains(&count) {
                encode_delta_chain(out, positions);
                count as u8
            } else {
                put_varint(out, count as u64);
                encode_delta_chain(out, positions);
                0
            }
        }
    }
}

fn encode_delta_chain(out: &mut Vec<u8>, positions: &[u64]) {
    let mut prev = 0u64;
    for (i, &p) in positions.iter().enumerate() {
        if i == 0 {
            put_varint(out, p);
        } else {
            put_varint(out, p - prev);
        }
        prev = p;
    }
}

/// Decodes an object-index value given its type nibble. Returns
/// `(value, bytes consumed)`.
pub fn decode_object_value(buf: &[u8], value_type: u8) -> Result<(ObjectListValue, usize)> {
    let (count, mut pos) = if value_type == 0 {
        let (n, used) = get_varint(buf)?;
        (n as usize, used)
    } else {
        (value_type as usize, 0)
    };
    if count == 0 {
        return Ok((ObjectListValue::ScanRequired, pos));
    }
    let mut positions = Vec::with_capacity(count);
    let mut prev = 0u64;
    for i in 0..count {
        let (delta, used) = get_varint(&buf[pos..])?;
        pos += used;
        let v = if i == 0 { delta } else { prev + delta };
        positions.push(v);
        prev = v;
    }
    Ok((ObjectListValue::Positions(positions), pos))
}

/// Encodes an index entry's value: the child block's file offset.
pub fn encode_index_value(out: &mut Vec<u8>, child_block_position: u64) {
    put_varint(out, child_block_position);
}

/// Decodes an index entry's value. Returns `(childBlockPosition, bytes
/// consumed)`.
pub fn decode_index_value(buf: &[u8]) -> Result<(u64, usize)> {
    get_varint(buf)
}

fn get_slice(buf: &[u8], pos: usize, len: usize) -> Result<&[u8]> {
    buf.get(pos..pos + len)
        .ok_or_else(|| ReftableError::InvalidBlock("value: buffer underflow".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_value_roundtrip_all_variants() {
        let cases = [
            RefValue::Deletion,
            RefValue::Unpeeled(ObjectId::from_slice(&[7u8; 20]).unwrap()),
            RefValue::Peeled {
                tag: ObjectId::from_slice(&[1u8; 20]).unwrap(),
                target: ObjectId::from_slice(&[2u8; 20]).unwrap(),
            },
            RefValue::Symbolic("refs/heads/main".to_string()),
        ];
        for value in cases {
            let mut buf = Vec::new();
            let value_type = encode_ref_value(&mut buf, 42, &value);
            let (delta, decoded, consumed) = decode_ref_value(&buf, value_type).unwrap();
            assert_eq!(delta, 42);
            assert_eq!(decoded, value);
            assert_eq!(consumed, buf.len());
        }
    }

    #[test]
    fn log_value_roundtrip() {
        let data = LogData {
            old_id: ObjectId::from_slice(&[1u8; 20]).unwrap(),
            new_id: ObjectId::from_slice(&[2u8; 20]).unwrap(),
            name: "Jane Doe".to_string(),
            email: "jane@example.com".to_string(),
            time_secs: 1_700_000_000,
            tz_minutes: -420,
            message: "push".to_string(),
        };
        let mut buf = Vec::new();
        let value_type = encode_log_value(&mut buf, Some(&data));
        let (decoded, consumed) = decode_log_value(&buf, value_type).unwrap();
        assert_eq!(decoded, Some(data));
        assert_eq!(consumed, buf.len());

        let mut del_buf = Vec::new();
        let del_type = encode_log_value(&mut del_buf, None);
        let (decoded_del, consumed_del) = decode_log_value(&del_buf, del_type).unwrap();
        assert_eq!(decoded_del, None);
        assert_eq!(consumed_del, 0);
    }

    #[test]
    fn object_value_roundtrip_small_and_large_lists() {
        for positions in [vec![5u64], vec![1, 2, 9, 400], vec![1, 2, 3, 4, 5, 6, 7, 8, 9]] {
            let value = ObjectListValue::Positions(positions.clone());
            let mut buf = Vec::new();
            let value_type = encode_object_value(&mut buf, &value);
            let (decoded, consumed) = decode_object_value(&buf, value_type).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, buf.len());
        }
    }

    #[test]
    fn object_value_scan_required_is_empty_list() {
        let mut buf = Vec::new();
        let value_type = encode_object_value(&mut buf, &ObjectListValue::ScanRequired);
        let (decoded, _) = decode_object_value(&buf, value_type).unwrap();
        assert_eq!(decoded, ObjectListValue::ScanRequired);
    }

    #[test]
    fn index_value_roundtrip() {
        let mut buf = Vec::new();
        encode_index_value(&mut buf, 123_456);
        let (pos, consumed) = decode_index_value(&buf).unwrap();
        assert_eq!(pos, 123_456);
        assert_eq!(consumed, buf.len());
    }
}
