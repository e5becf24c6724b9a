//! Table reader: lazy header/footer access and the four
//! cursor kinds a caller can open over one table.

use super::{first_present_or, FileHeader, Footer, HEADER_LEN};
use crate::block::{
    self, decode_index_value, decode_log_value, decode_object_value, decode_ref_value, Block,
    BlockType,
};
use crate::block_source::BlockSource;
use crate::error::{ReftableError, Result};
use crate::framing::ObjectId;
use crate::record::{LogRecord, ObjectListValue, Ref, RefValue, Storage};
use std::io::Read as _;
use std::sync::{Arc, OnceLock};

/// Reads one reftable file. Cheap to open: only the 24-byte header is
/// read eagerly. The footer (and therefore section bounds) is read
/// lazily, on the first operation that needs it.
pub struct TableReader<S> {
    source: S,
    header: FileHeader,
    footer: OnceLock<Footer>,
}

struct SectionBounds {
    ref_start: u64,
    ref_end: u64,
    object_start: u64,
    object_end: u64,
    log_start: u64,
    log_end: u64,
}

impl<S: BlockSource> TableReader<S> {
    /// Opens a table, reading its header.
    pub fn open(source: S) -> Result<Self> {
        let head = source.read(0, HEADER_LEN)?;
        let header = FileHeader::parse(&head)?;
        Ok(Self {
            source,
            header,
            footer: OnceLock::new(),
        })
    }

    /// Lower bound of this table's `updateIndex` range.
    #[must_use]
    pub fn min_update_index(&self) -> u64 {
        self.header.min_update_index
    }

    /// Upper bound of this table's `updateIndex` range.
    #[must_use]
    pub fn max_update_index(&self) -> u64 {
        self.header.max_update_index
    }

    fn footer(&self) -> Result<&Footer> {
        if let Some(f) = self.footer.get() {
            return Ok(f);
        }
        let size = self.source.size()?;
        let footer_len = super::FOOTER_LEN as u64;
        if size < footer_len {
            return Err(ReftableError::TruncatedRead {
                expected: footer_len as usize,
                got: size as usize,
            });
        }
        let buf = self.source.read(size - footer_len, footer_len as usize)?;
        let footer = Footer::parse(&buf)?;
        Ok(self.footer.get_or_init(|| footer))
    }

    fn section_bounds(&self) -> Result<SectionBounds> {
        let footer = self.footer()?;
        let file_size = self.source.size()?;
        let footer_start = file_size - super::FOOTER_LEN as u64;

        let ref_start = HEADER_LEN as u64;
        let ref_end = first_present_or(
            &[
                footer.ref_index_offset,
                footer.object_offset,
                footer.object_index_offset,
                footer.log_offset,
                footer.log_index_offset,
            ],
            footer_start,
        );
        let object_start = footer.object_offset;
        let object_end = if object_start != 0 {
            first_present_or(
                &[footer.object_index_offset, footer.log_offset, footer.log_index_offset],
                footer_start,
            )
        } else {
            0
        };
        let log_start = footer.log_offset;
        let log_end = if log_start != 0 {
            first_present_or(&[footer.log_index_offset], footer_start)
        } else {
            0
        };
        Ok(SectionBounds {
            ref_start,
            ref_end,
            object_start,
            object_end,
            log_start,
            log_end,
        })
    }

    /// Reads and parses the block at `offset`. Returns the parsed
    /// block plus its on-disk declared length (compressed length for
    /// log blocks), so the caller can step to the next block.
    fn read_block(&self, offset: u64) -> Result<(BlockType, Block, u32)> {
        let head = self.source.read(offset, block::HEADER_LEN)?;
        if head.len() < block::HEADER_LEN {
            return Err(ReftableError::TruncatedRead {
                expected: block::HEADER_LEN,
                got: head.len(),
            });
        }
        let (block_type, block_len) = block::unpack_header(&head)?;
        let raw = self
            .source
            .read(offset + block::HEADER_LEN as u64, block_len as usize)?;
        if raw.len() < block_len as usize {
            return Err(ReftableError::TruncatedRead {
                expected: block_len as usize,
                got: raw.len(),
            });
        }
        let payload = if block_type == BlockType::Log {
            inflate(&raw)?
        } else {
            raw
        };
        let block = Block::parse(block_type, payload)?;
        Ok((block_type, block, block_len))
    }

    fn step_offset(&self, current: u64, declared_len: u32, aligned: bool) -> u64 {
        let raw_end = current + block::HEADER_LEN as u64 + u64::from(declared_len);
        if aligned && self.header.ref_block_size > 0 {
            let rb = u64::from(self.header.ref_block_size);
            let rem = raw_end % rb;
            if rem == 0 {
                raw_end
            } else {
                raw_end + (rb - rem)
            }
        } else {
            raw_end
        }
    }

    /// Descends a (possibly multi-level) index starting at
    /// `root_offset`, returning the leaf (non-index) block whose key
    /// range should contain `target`.
    fn find_leaf_block(&self, root_offset: u64, target: &[u8]) -> Result<u64> {
        let mut offset = root_offset;
        loop {
            let (block_type, block, _len) = self.read_block(offset)?;
            if block_type != BlockType::Index {
                return Ok(offset);
            }
            let mut pos = 0;
            let mut prev_key = Vec::new();
            let mut last_child = None;
            let mut next = None;
            while block.has_more(pos) {
                let (key, _value_type, value_start) = block.decode_key(pos, &prev_key)?;
                let (child_offset, consumed) = decode_index_value(block.value_bytes(value_start))?;
                pos = value_start + consumed;
                last_child = Some(child_offset);
                if key.as_slice() >= target {
                    next = Some(child_offset);
                    prev_key = key;
                    break;
                }
                prev_key = key;
            }
            offset = next.or(last_child).ok_or_else(|| {
                ReftableError::InvalidBlock("index block has no entries".into())
            })?;
        }
    }

    /// Binary search across block-size-aligned ref blocks, used when no
    /// ref index was built but blocks are aligned (the common case).
    fn binary_search_ref_block(&self, start: u64, end: u64, target: &[u8]) -> Result<u64> {
        let rb = u64::from(self.header.ref_block_size);
        let num_slots = ((end + rb - 1) / rb).max(1);
        let (mut lo, mut hi) = (0u64, num_slots);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let block_offset = if mid == 0 { start } else { mid * rb };
            if block_offset >= end {
                hi = mid;
                continue;
            }
            let (block_type, block, _len) = self.read_block(block_offset)?;
            if block_type != BlockType::Ref {
                hi = mid;
                continue;
            }
            let (first_key, _, _) = block.decode_key(0, &[])?;
            if first_key.as_slice() <= target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(if lo <= 1 { start } else { (lo - 1) * rb })
    }

    /// Plain forward scan across blocks of `expected_type`, returning
    /// the last block whose first key does not exceed `target`. Used
    /// for unaligned ref blocks and for the log section (which is
    /// never block-size aligned).
    fn linear_scan_find_block(
        &self,
        start: u64,
        end: u64,
        target: &[u8],
        expected_type: BlockType,
    ) -> Result<u64> {
        let mut offset = start;
        let mut candidate = start;
        while offset < end {
            let (block_type, block, declared_len) = self.read_block(offset)?;
            if block_type != expected_type {
                break;
            }
            let (first_key, _, _) = block.decode_key(0, &[])?;
            if first_key.as_slice() > target {
                break;
            }
            candidate = offset;
            offset = self.step_offset(offset, declared_len, false);
        }
        Ok(candidate)
    }

    /// A cursor over every reference in the table, in name order.
    pub fn ref_cursor(self: Arc<Self>, include_deletes: bool) -> Result<RefCursor<S>> {
        let bounds = self.section_bounds()?;
        Ok(RefCursor::new(
            self,
            include_deletes,
            bounds.ref_start,
            bounds.ref_end,
            None,
        ))
    }

    /// A cursor positioned at `name` (exact) or, if `name` ends with
    /// `/`, at the start of the prefix range (iteration stops at the
    /// first key outside the prefix).
    pub fn seek_ref(self: Arc<Self>, name: &str, include_deletes: bool) -> Result<RefCursor<S>> {
        let bounds = self.section_bounds()?;
        if bounds.ref_start >= bounds.ref_end {
            return Ok(RefCursor::new(
                self,
                include_deletes,
                bounds.ref_start,
                bounds.ref_end,
                None,
            ));
        }
        let footer = self.footer()?;
        let target = name.as_bytes();
        let leaf_offset = if footer.ref_index_offset != 0 {
            self.find_leaf_block(footer.ref_index_offset, target)?
        } else if self.header.ref_block_size > 0 {
            self.binary_search_ref_block(bounds.ref_start, bounds.ref_end, target)?
        } else {
            self.linear_scan_find_block(bounds.ref_start, bounds.ref_end, target, BlockType::Ref)?
        };
        let (block_type, block, declared_len) = self.read_block(leaf_offset)?;
        if block_type != BlockType::Ref {
            return Err(ReftableError::InvalidBlock("expected ref leaf block".into()));
        }
        let (pos, prev_key) = locate_in_block(&block, target, |buf, vt| {
            decode_ref_value(buf, vt).map(|(_, _, n)| n)
        })?;
        let next_offset = self.step_offset(leaf_offset, declared_len, true);
        let prefix = name.ends_with('/').then(|| target.to_vec());
        let mut cursor = RefCursor::new(self, include_deletes, next_offset, bounds.ref_end, prefix);
        cursor.seed(block, pos, prev_key);
        Ok(cursor)
    }

    /// Returns every live reference pointing at `id` (directly, or as
    /// an annotated tag's peeled target).
    pub fn refs_by_object_id(&self, id: &ObjectId) -> Result<Vec<Ref>> {
        let bounds = self.section_bounds()?;
        let footer = self.footer()?;

        if footer.object_offset == 0 {
            return self.scan_all_refs_for_id(&bounds, id);
        }

        let prefix_len = footer.object_id_len as usize;
        let truncated = &id.as_bytes()[..prefix_len];
        let leaf_offset = if footer.object_index_offset != 0 {
            self.find_leaf_block(footer.object_index_offset, truncated)?
        } else {
            self.linear_scan_find_block(bounds.object_start, bounds.object_end, truncated, BlockType::Object)?
        };

        let (block_type, block, _len) = self.read_block(leaf_offset)?;
        if block_type != BlockType::Object {
            return self.scan_all_refs_for_id(&bounds, id);
        }
        let (pos, _prev) = locate_in_block(&block, truncated, |buf, vt| {
            decode_object_value(buf, vt).map(|(_, n)| n)
        })?;
        if !block.has_more(pos) {
            return self.scan_all_refs_for_id(&bounds, id);
        }
        let (key, value_type, value_start) = block.decode_key(pos, &[])?;
        if key.as_slice() != truncated {
            return self.scan_all_refs_for_id(&bounds, id);
        }
        let (value, _consumed) = decode_object_value(block.value_bytes(value_start), value_type)?;

        match value {
            ObjectListValue::ScanRequired => self.scan_all_refs_for_id(&bounds, id),
            ObjectListValue::Positions(positions) => {
                let mut found = Vec::new();
                for block_offset in positions {
                    let (bt, refs_block, _) = self.read_block(block_offset)?;
                    if bt != BlockType::Ref {
                        continue;
                    }
                    self.collect_matching_refs(&refs_block, id, &mut found)?;
                }
                Ok(found)
            }
        }
    }

    fn scan_all_refs_for_id(&self, bounds: &SectionBounds, id: &ObjectId) -> Result<Vec<Ref>> {
        let mut found = Vec::new();
        let mut offset = bounds.ref_start;
        while offset < bounds.ref_end {
            let (block_type, block, declared_len) = self.read_block(offset)?;
            if block_type != BlockType::Ref {
                break;
            }
            self.collect_matching_refs(&block, id, &mut found)?;
            offset = self.step_offset(offset, declared_len, true);
        }
        Ok(found)
    }

    fn collect_matching_refs(&self, block: &Block, id: &ObjectId, out: &mut Vec<Ref>) -> Result<()> {
        let mut pos = 0;
        let mut prev_key = Vec::new();
        while block.has_more(pos) {
            let (key, value_type, value_start) = block.decode_key(pos, &prev_key)?;
            let (delta, value, consumed) = decode_ref_value(block.value_bytes(value_start), value_type)?;
            pos = value_start + consumed;
            if value.indexable_object_id().as_ref() == Some(id) {
                let name = String::from_utf8(key.clone())
                    .map_err(|e| ReftableError::InvalidBlock(format!("invalid utf-8 ref name: {e}")))?;
                out.push(Ref {
                    name,
                    storage: Storage::Packed,
                    update_index: self.header.min_update_index + delta,
                    value,
                });
            }
            prev_key = key;
        }
        Ok(())
    }

    /// A cursor over every reflog entry in the table, in physical-key
    /// order (refname ascending, `updateIndex` descending).
    pub fn log_cursor(self: Arc<Self>, include_deletes: bool) -> Result<LogCursor<S>> {
        let bounds = self.section_bounds()?;
        Ok(LogCursor::new(
            self,
            include_deletes,
            bounds.log_start,
            bounds.log_end,
        ))
    }

    /// A cursor positioned at the most-recent reflog entry for
    /// `refname` at or before `update_index`.
    pub fn seek_log(self: Arc<Self>, refname: &str, update_index: u64, include_deletes: bool) -> Result<LogCursor<S>> {
        let bounds = self.section_bounds()?;
        if bounds.log_start >= bounds.log_end {
            return Ok(LogCursor::new(self, include_deletes, bounds.log_start, bounds.log_end));
        }
        let footer = self.footer()?;
        let target = LogRecord::physical_key(refname, update_index);
        let leaf_offset = if footer.log_index_offset != 0 {
            self.find_leaf_block(footer.log_index_offset, &target)?
        } else {
            self.linear_scan_find_block(bounds.log_start, bounds.log_end, &target, BlockType::Log)?
        };
        let (block_type, block, declared_len) = self.read_block(leaf_offset)?;
        if block_type != BlockType::Log {
            return Err(ReftableError::InvalidBlock("expected log leaf block".into()));
        }
        let (pos, prev_key) = locate_in_block(&block, &target, |buf, vt| {
            decode_log_value(buf, vt).map(|(_, n)| n)
        })?;
        let next_offset = self.step_offset(leaf_offset, declared_len, false);
        let mut cursor = LogCursor::new(self, include_deletes, next_offset, bounds.log_end);
        cursor.seed(block, pos, prev_key);
        Ok(cursor)
    }
}

fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = flate2::read::DeflateDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Binary-searches the restart table, then linearly scans forward,
/// stopping at the first entry whose key is `>= target`. `value_len`
/// decodes just enough of a value to report its byte length, so the
/// scan can skip over entries generically regardless of section kind.
fn locate_in_block(
    block: &Block,
    target: &[u8],
    value_len: impl Fn(&[u8], u8) -> Result<usize>,
) -> Result<(usize, Vec<u8>)> {
    let mut pos = block.restart_scan_start(target, |off| {
        let (k, _, _) = block.decode_key(off, &[])?;
        Ok(k)
    })?;
    let mut prev = Vec::new();
    while block.has_more(pos) {
        let (key, value_type, value_start) = block.decode_key(pos, &prev)?;
        if key.as_slice() >= target {
            return Ok((pos, prev));
        }
        let consumed = value_len(block.value_bytes(value_start), value_type)?;
        pos = value_start + consumed;
        prev = key;
    }
    Ok((pos, prev))
}

fn parse_physical_log_key(key: &[u8]) -> Result<(String, u64)> {
    if key.len() < 9 {
        return Err(ReftableError::InvalidBlock("log key too short".into()));
    }
    let split = key.len() - 8;
    if key[split - 1] != 0 {
        return Err(ReftableError::InvalidBlock(
            "log key missing NUL separator".into(),
        ));
    }
    let refname = String::from_utf8(key[..split - 1].to_vec())
        .map_err(|e| ReftableError::InvalidBlock(format!("invalid utf-8 refname: {e}")))?;
    let mut complement = [0u8; 8];
    complement.copy_from_slice(&key[split..]);
    let update_index = !u64::from_be_bytes(complement);
    Ok((refname, update_index))
}

/// A lazily-advancing cursor over the ref section.
pub struct RefCursor<S> {
    reader: Arc<TableReader<S>>,
    include_deletes: bool,
    offset: u64,
    section_end: u64,
    block: Option<Block>,
    pos: usize,
    prev_key: Vec<u8>,
    prefix: Option<Vec<u8>>,
    done: bool,
}

impl<S: BlockSource> RefCursor<S> {
    fn new(
        reader: Arc<TableReader<S>>,
        include_deletes: bool,
        offset: u64,
        section_end: u64,
        prefix: Option<Vec<u8>>,
    ) -> Self {
        let done = offset >= section_end;
        Self {
            reader,
            include_deletes,
            offset,
            section_end,
            block: None,
            pos: 0,
            prev_key: Vec::new(),
            prefix,
            done,
        }
    }

    fn seed(&mut self, block: Block, pos: usize, prev_key: Vec<u8>) {
        self.block = Some(block);
        self.pos = pos;
        self.prev_key = prev_key;
        self.done = false;
    }

    fn advance_block(&mut self) -> Result<bool> {
        if self.offset >= self.section_end {
            return Ok(false);
        }
        let (block_type, block, declared_len) = self.reader.read_block(self.offset)?;
        if block_type != BlockType::Ref {
            return Ok(false);
        }
        self.offset = self.reader.step_offset(self.offset, declared_len, true);
        self.block = Some(block);
        self.pos = 0;
        self.prev_key.clear();
        Ok(true)
    }

    /// Advances to and returns the next visible reference, or `None`
    /// when the cursor is exhausted.
    pub fn next(&mut self) -> Result<Option<Ref>> {
        loop {
            if self.done {
                return Ok(None);
            }
            let need_new_block = match &self.block {
                None => true,
                Some(b) => !b.has_more(self.pos),
            };
            if need_new_block && !self.advance_block()? {
                self.done = true;
                return Ok(None);
            }
            let block = self.block.as_ref().expect("seeded above");
            let (key, value_type, value_start) = block.decode_key(self.pos, &self.prev_key)?;
            let (delta, value, consumed) = decode_ref_value(block.value_bytes(value_start), value_type)?;
            self.pos = value_start + consumed;
            self.prev_key = key.clone();

            if let Some(prefix) = &self.prefix {
                if !key.starts_with(prefix.as_slice()) {
                    self.done = true;
                    return Ok(None);
                }
            }

            let name = String::from_utf8(key)
                .map_err(|e| ReftableError::InvalidBlock(format!("invalid utf-8 ref name: {e}")))?;
            let r = Ref {
                name,
                storage: Storage::Packed,
                update_index: self.reader.header.min_update_index + delta,
                value,
            };
            if !self.include_deletes && r.is_deletion() {
                continue;
            }
            return Ok(Some(r));
        }
    }
}

/// A lazily-advancing cursor over the log section.
pub struct LogCursor<S> {
    reader: Arc<TableReader<S>>,
    include_deletes: bool,
    offset: u64,
    section_end: u64,
    block: Option<Block>,
    pos: usize,
    prev_key: Vec<u8>,
    done: bool,
}

impl<S: BlockSource> LogCursor<S> {
    fn new(reader: Arc<TableReader<S>>, include_deletes: bool, offset: u64, section_end: u64) -> Self {
        let done = offset >= section_end;
        Self {
            reader,
            include_deletes,
            offset,
            section_end,
            block: None,
            pos: 0,
            prev_key: Vec::new(),
            done,
        }
    }

    fn seed(&mut self, block: Block, pos: usize, prev_key: Vec<u8>) {
        self.block = Some(block);
        self.pos = pos;
        self.prev_key = prev_key;
        self.done = false;
    }

    fn advance_block(&mut self) -> Result<bool> {
        if self.offset >= self.section_end {
            return Ok(false);
        }
        let (block_type, block, declared_len) = self.reader.read_block(self.offset)?;
        if block_type != BlockType::Log {
            return Ok(false);
        }
        self.offset = self.reader.step_offset(self.offset, declared_len, false);
        self.block = Some(block);
        self.pos = 0;
        self.prev_key.clear();
        Ok(true)
    }

    /// Advances to and returns the next visible reflog entry, or
    /// `None` when the cursor is exhausted.
    pub fn next(&mut self) -> Result<Option<LogRecord>> {
        loop {
            if self.done {
                return Ok(None);
            }
            let need_new_block = match &self.block {
                None => true,
                Some(b) => !b.has_more(self.pos),
            };
            if need_new_block && !self.advance_block()? {
                self.done = true;
                return Ok(None);
            }
            let block = self.block.as_ref().expect("seeded above");
            let (key, value_type, value_start) = block.decode_key(self.pos, &self.prev_key)?;
            let (data, consumed) = decode_log_value(block.value_bytes(value_start), value_type)?;
            self.pos = value_start + consumed;
            self.prev_key = key.clone();

            let (refname, update_index) = parse_physical_log_key(&key)?;
            let is_deletion = data.is_none();
            if !self.include_deletes && is_deletion {
                continue;
            }
            return Ok(Some(LogRecord {
                refname,
                update_index,
                data,
            }));
        }
    }
}
