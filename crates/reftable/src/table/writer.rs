//! Table writer: a single-use pipeline that emits the
//! ref, object, and log sections in order and finishes with a footer.

use super::{FileHeader, Footer, HEADER_LEN};
use crate::block::{
    encode_index_value, encode_log_value, encode_object_value, encode_ref_value, AddOutcome,
    BlockType, BlockWriter, REF_1ID, REF_2ID,
};
use crate::error::{ReftableError, Result};
use crate::framing::ObjectId;
use crate::output_stream::OutputStream;
use crate::record::{LogRecord, ObjectListValue, Ref};
use reftable_config::WriterOptions;
use std::collections::BTreeMap;
use std::io::Write;

/// Minimum number of index entries in a section before the writer
/// bothers emitting an index for it.
const REF_INDEX_THRESHOLD: usize = 4;
const OBJECT_OR_LOG_INDEX_THRESHOLD: usize = 1;

/// Minimum/maximum width of the truncated object-ID key used by the
/// object section.
const MIN_OBJECT_ID_LEN: usize = 2;
const MAX_OBJECT_ID_LEN: usize = 20;

/// Collects `(lastKeyOfBlock, blockOffset)` pairs as a section's blocks
/// are flushed, ready to feed the next index level (or to skip
/// indexing entirely if the section stayed under threshold).
#[derive(Default)]
pub struct IndexBuilder {
    entries: Vec<(Vec<u8>, u64)>,
}

impl IndexBuilder {
    /// Records one flushed block's last key and file offset.
    pub fn record(&mut self, last_key: Vec<u8>, block_offset: u64) {
        self.entries.push((last_key, block_offset));
    }

    /// Number of blocks recorded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no blocks were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A single-use pipeline that writes one reftable file.
pub struct TableWriter;

impl TableWriter {
    /// Writes a table from already name-sorted `refs` and already
    /// physical-key-sorted `logs`. Both iterators are fully consumed;
    /// sections are emitted in order (ref, object, log), then the
    /// footer.
    ///
    /// # Errors
    ///
    /// Returns [`ReftableError::OrderViolation`] if `refs` or `logs`
    /// are not strictly ascending, or
    /// [`ReftableError::UpdateIndexOutOfRange`] if a ref's
    /// `updateIndex` falls outside `[min_update_index,
    /// max_update_index]`.
    pub fn write<W: Write>(
        sink: W,
        options: &WriterOptions,
        min_update_index: u64,
        max_update_index: u64,
        refs: impl IntoIterator<Item = Ref>,
        logs: impl IntoIterator<Item = LogRecord>,
    ) -> Result<W> {
        let ref_block_size = if options.align_blocks() {
            options.ref_block_size()
        } else {
            0
        };
        let header = FileHeader {
            ref_block_size,
            min_update_index,
            max_update_index,
        };
        let mut header_bytes = Vec::with_capacity(HEADER_LEN);
        header.write_to(&mut header_bytes)?;

        let mut out = OutputStream::new(sink, options.align_blocks().then_some(options.ref_block_size()));
        out.write_raw(&header_bytes)?;

        let (object_positions, ref_index) = Self::write_ref_section(
            &mut out,
            options,
            min_update_index,
            max_update_index,
            refs,
        )?;

        let ref_index_offset = if ref_index.len() >= REF_INDEX_THRESHOLD {
            Some(Self::write_index(
                &mut out,
                ref_index.entries,
                options.ref_block_size(),
                options.restart_interval(),
                options.max_index_levels(),
            )?)
        } else {
            None
        };

        let (object_offset, object_id_len, object_index_offset) = if options.index_objects()
            && !object_positions.is_empty()
        {
            if options.align_blocks() {
                out.pad_to_next_block()?;
            }
            Self::write_object_section(&mut out, options, object_positions)?
        } else {
            (0, 0, None)
        };

        let (log_offset, log_index_offset) = Self::write_log_section(&mut out, options, logs)?;

        let footer = Footer {
            header,
            ref_index_offset: ref_index_offset.unwrap_or(0),
            object_offset,
            object_id_len,
            object_index_offset: object_index_offset.unwrap_or(0),
            log_offset,
            log_index_offset: log_index_offset.unwrap_or(0),
        };
        let mut footer_bytes = Vec::with_capacity(super::FOOTER_LEN);
        footer.write_to(&mut footer_bytes)?;
        out.write_raw(&footer_bytes)?;

        Ok(out.into_inner())
    }

    /// Convenience entry point: accepts refs in any order,
    /// sorts them by name, rejects exact-name duplicates, and writes
    /// them alongside already-sorted `logs`.
    pub fn write_unordered<W: Write>(
        sink: W,
        options: &WriterOptions,
        min_update_index: u64,
        max_update_index: u64,
        mut refs: Vec<Ref>,
        logs: Vec<LogRecord>,
    ) -> Result<W> {
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        for w in refs.windows(2) {
            if w[0].name == w[1].name {
                return Err(ReftableError::OrderViolation {
                    previous: w[0].name.clone().into_bytes(),
                    next: w[1].name.clone().into_bytes(),
                });
            }
        }
        Self::write(sink, options, min_update_index, max_update_index, refs, logs)
    }

    fn write_ref_section<W: Write>(
        out: &mut OutputStream<W>,
        options: &WriterOptions,
        min_update_index: u64,
        max_update_index: u64,
        refs: impl IntoIterator<Item = Ref>,
    ) -> Result<(BTreeMap<ObjectId, Vec<u64>>, IndexBuilder)> {
        let max_block_len = options.ref_block_size();
        let restart_interval = options.restart_interval();
        let align = options.align_blocks();

        // Block 0 of the ref section shares its on-disk slot with the
        // 24-byte file header (it starts at offset HEADER_LEN, not 0),
        // so its budget must leave room for that header or alignment
        // padding would push every later block a header's-width off the
        // `N * refBlockSize` grid the index and binary-search seek rely
        // on. Every block after the first starts at a fresh slot
        // boundary and gets the full budget.
        let first_block_budget = if align {
            max_block_len.saturating_sub(HEADER_LEN as u32)
        } else {
            max_block_len
        };

        let mut index = IndexBuilder::default();
        let mut object_positions: BTreeMap<ObjectId, Vec<u64>> = BTreeMap::new();
        let mut current_block_ids: Vec<ObjectId> = Vec::new();
        let mut writer = BlockWriter::new(BlockType::Ref, first_block_budget, restart_interval);
        let mut last_name: Option<String> = None;

        macro_rules! flush_current_block {
            () => {{
                let last_key = writer.last_key().to_vec();
                let finished = std::mem::replace(
                    &mut writer,
                    BlockWriter::new(BlockType::Ref, max_block_len, restart_interval),
                );
                let offset = out.write_block(BlockType::Ref, &finished.finish())?;
                index.record(last_key, offset);
                for id in current_block_ids.drain(..) {
                    let positions = object_positions.entry(id).or_default();
                    if positions.last() != Some(&offset) {
                        positions.push(offset);
                    }
                }
                if align {
                    out.pad_to_next_block()?;
                }
            }};
        }

        for r in refs {
            if let Some(prev) = &last_name {
                if &r.name <= prev {
                    return Err(ReftableError::OrderViolation {
                        previous: prev.clone().into_bytes(),
                        next: r.name.clone().into_bytes(),
                    });
                }
            }
            if !(min_update_index..=max_update_index).contains(&r.update_index) {
                return Err(ReftableError::UpdateIndexOutOfRange {
                    index: r.update_index,
                    min: min_update_index,
                    max: max_update_index,
                });
            }
            last_name = Some(r.name.clone());

            let mut value_payload = Vec::new();
            let value_type =
                encode_ref_value(&mut value_payload, r.update_index - min_update_index, &r.value);

            loop {
                match writer.add(r.name.as_bytes(), value_type, &value_payload)? {
                    AddOutcome::Added => break,
                    AddOutcome::BlockFull => flush_current_block!(),
                }
            }
            // Recorded against whichever block this entry actually
            // landed in, flushed later (above) or at section close.
            if let Some(id) = r.value.indexable_object_id() {
                current_block_ids.push(id);
            }
        }

        if !writer.is_empty() {
            flush_current_block!();
        }

        Ok((object_positions, index))
    }

    fn write_object_section<W: Write>(
        out: &mut OutputStream<W>,
        options: &WriterOptions,
        positions_by_id: BTreeMap<ObjectId, Vec<u64>>,
    ) -> Result<(u64, u8, Option<u64>)> {
        let id_len = shortest_unique_prefix_len(positions_by_id.keys());
        let max_block_len = options.ref_block_size();
        let restart_interval = options.restart_interval();

        // Collapse by truncated prefix: ids sharing a prefix at id_len
        // bytes merge their block-position lists (deduplicated, sorted).
        let mut by_prefix: BTreeMap<Vec<u8>, Vec<u64>> = BTreeMap::new();
        for (id, mut positions) in positions_by_id {
            let prefix = id.as_bytes()[..id_len].to_vec();
            let bucket = by_prefix.entry(prefix).or_default();
            bucket.append(&mut positions);
        }
        for positions in by_prefix.values_mut() {
            positions.sort_unstable();
            positions.dedup();
        }

        let section_start = out.bytes_written();
        let mut index = IndexBuilder::default();
        let mut writer = BlockWriter::new(BlockType::Object, max_block_len, restart_interval);

        for (prefix, positions) in by_prefix {
            let value = if encoded_object_list_len(&positions) + prefix.len() + 8 > max_block_len as usize
            {
                ObjectListValue::ScanRequired
            } else {
                ObjectListValue::Positions(positions)
            };
            let mut payload = Vec::new();
            let value_type = encode_object_value(&mut payload, &value);

            loop {
                match writer.add(&prefix, value_type, &payload)? {
                    AddOutcome::Added => break,
                    AddOutcome::BlockFull => {
                        let last_key = writer.last_key().to_vec();
                        let finished = std::mem::replace(
                            &mut writer,
                            BlockWriter::new(BlockType::Object, max_block_len, restart_interval),
                        );
                        let offset = out.write_block(BlockType::Object, &finished.finish())?;
                        index.record(last_key, offset);
                    }
                }
            }
        }
        if !writer.is_empty() {
            let last_key = writer.last_key().to_vec();
            let offset = out.write_block(BlockType::Object, &writer.finish())?;
            index.record(last_key, offset);
        }

        let object_index_offset = if index.len() >= OBJECT_OR_LOG_INDEX_THRESHOLD {
            Some(Self::write_index(
                out,
                index.entries,
                max_block_len,
                restart_interval,
                options.max_index_levels(),
            )?)
        } else {
            None
        };

        Ok((section_start, id_len as u8, object_index_offset))
    }

    fn write_log_section<W: Write>(
        out: &mut OutputStream<W>,
        options: &WriterOptions,
        logs: impl IntoIterator<Item = LogRecord>,
    ) -> Result<(u64, Option<u64>)> {
        let max_block_len = options.log_block_size();
        let restart_interval = options.restart_interval();

        let section_start = out.bytes_written();
        let mut index = IndexBuilder::default();
        let mut writer = BlockWriter::new(BlockType::Log, max_block_len, restart_interval);
        let mut last_key: Option<Vec<u8>> = None;
        let mut any = false;

        for log in logs {
            any = true;
            let key = LogRecord::physical_key(&log.refname, log.update_index);
            if let Some(prev) = &last_key {
                if &key <= prev {
                    return Err(ReftableError::OrderViolation {
                        previous: prev.clone(),
                        next: key,
                    });
                }
            }
            last_key = Some(key.clone());

            let mut payload = Vec::new();
            let value_type = encode_log_value(&mut payload, log.data.as_ref());

            loop {
                match writer.add(&key, value_type, &payload)? {
                    AddOutcome::Added => break,
                    AddOutcome::BlockFull => {
                        let lk = writer.last_key().to_vec();
                        let finished = std::mem::replace(
                            &mut writer,
                            BlockWriter::new(BlockType::Log, max_block_len, restart_interval),
                        );
                        let offset = out.write_block(BlockType::Log, &finished.finish())?;
                        index.record(lk, offset);
                    }
                }
            }
        }
        if !writer.is_empty() {
            let lk = writer.last_key().to_vec();
            let offset = out.write_block(BlockType::Log, &writer.finish())?;
            index.record(lk, offset);
        }
        if !any {
            return Ok((0, None));
        }

        let log_index_offset = if index.len() >= OBJECT_OR_LOG_INDEX_THRESHOLD {
            Some(Self::write_index(
                out,
                index.entries,
                max_block_len,
                restart_interval,
                options.max_index_levels(),
            )?)
        } else {
            None
        };
        Ok((section_start, log_index_offset))
    }

    /// Packs `(key, childOffset)` pairs into one or more levels of
    /// index blocks, stacking levels until one fits in a single block
    /// (which becomes the root), bounded by `max_levels` (`0` =
    /// unlimited). Returns the root block's offset.
    fn write_index<W: Write>(
        out: &mut OutputStream<W>,
        mut entries: Vec<(Vec<u8>, u64)>,
        max_block_len: u32,
        restart_interval: u16,
        max_levels: u32,
    ) -> Result<u64> {
        let mut level = 0u32;
        loop {
            level += 1;
            let mut next_level = Vec::new();
            let mut writer = BlockWriter::new(BlockType::Index, max_block_len, restart_interval);
            let mut last_offset = 0u64;

            for (key, child_offset) in &entries {
                let mut payload = Vec::new();
                encode_index_value(&mut payload, *child_offset);
                loop {
                    match writer.add(key, 0, &payload)? {
                        AddOutcome::Added => break,
                        AddOutcome::BlockFull => {
                            let last_key = writer.last_key().to_vec();
                            let finished = std::mem::replace(
                                &mut writer,
                                BlockWriter::new(BlockType::Index, max_block_len, restart_interval),
                            );
                            let offset = out.write_block(BlockType::Index, &finished.finish())?;
                            next_level.push((last_key, offset));
                            last_offset = offset;
                        }
                    }
                }
            }
            if !writer.is_empty() {
                let last_key = writer.last_key().to_vec();
                let offset = out.write_block(BlockType::Index, &writer.finish())?;
                next_level.push((last_key, offset));
                last_offset = offset;
            }

            if next_level.len() <= 1 || (max_levels != 0 && level >= max_levels) {
                return Ok(last_offset);
            }
            entries = next_level;
        }
    }
}

fn encoded_object_list_len(positions: &[u64]) -> usize {
    let mut buf = Vec::new();
    let value = ObjectListValue::Positions(positions.to_vec());
    encode_object_value(&mut buf, &value);
    buf.len()
}

/// Shortest byte length in `[2, 20]` that uniquely discriminates every
/// ID in `ids` by its prefix.
fn shortest_unique_prefix_len<'a>(ids: impl Iterator<Item = &'a ObjectId> + Clone) -> usize {
    for len in MIN_OBJECT_ID_LEN..=MAX_OBJECT_ID_LEN {
        let mut seen = std::collections::HashSet::new();
        if ids.clone().all(|id| seen.insert(&id.as_bytes()[..len])) {
            return len;
        }
    }
    MAX_OBJECT_ID_LEN
}
