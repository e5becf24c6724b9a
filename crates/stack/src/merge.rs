//! Merged reader: k-way priority-queue merge over a
//! stack of tables, newer tables shadowing older ones.
//!
//! Mirrors the shape of a sorted-run merge over multiple on-disk
//! sources: a min-heap of per-source head records, draining every
//! entry shadowed by the winner before advancing. Unlike a point-store
//! merge the per-source cursors are already lazy forward iterators, so
//! there is no separate "read by key" step — the heap carries the
//! fully decoded record, not just its key.

use reftable::{LogCursor, LogRecord, Ref, RefCursor};
use reftable::{BlockSource, Result};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct RefHeapEntry {
    name: String,
    update_index: u64,
    source: usize,
    record: Ref,
}

impl PartialEq for RefHeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.update_index == other.update_index && self.source == other.source
    }
}
impl Eq for RefHeapEntry {}

impl PartialOrd for RefHeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RefHeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // `BinaryHeap` is a max-heap. Reverse the name comparison so the
        // smallest name surfaces first; among equal names prefer the
        // highest updateIndex, then the highest stack position (most
        // recent table), matching the `(name, -updateIndex, -stackIndex)`
        // ordering key.
        other
            .name
            .cmp(&self.name)
            .then_with(|| self.update_index.cmp(&other.update_index))
            .then_with(|| self.source.cmp(&other.source))
    }
}

/// Merged view over the ref sections of every table in a stack, newest
/// table winning on name collisions.
pub struct MergedRefCursor<S> {
    cursors: Vec<RefCursor<S>>,
    heap: BinaryHeap<RefHeapEntry>,
    include_deletes: bool,
}

impl<S: BlockSource> MergedRefCursor<S> {
    pub(crate) fn new(mut cursors: Vec<RefCursor<S>>, include_deletes: bool) -> Result<Self> {
        let mut heap = BinaryHeap::new();
        for source in 0..cursors.len() {
            Self::push_next(&mut cursors, &mut heap, source)?;
        }
        Ok(Self {
            cursors,
            heap,
            include_deletes,
        })
    }

    fn push_next(cursors: &mut [RefCursor<S>], heap: &mut BinaryHeap<RefHeapEntry>, source: usize) -> Result<()> {
        // Per-source cursors always run with delete visibility on: a
        // tombstone in a middle table must still shadow an older live
        // record, so the *merge* layer is the only place that should
        // ever drop a record for being a deletion.
        if let Some(record) = cursors[source].next()? {
            heap.push(RefHeapEntry {
                name: record.name.clone(),
                update_index: record.update_index,
                source,
                record,
            });
        }
        Ok(())
    }

    /// Advances to and returns the next visible reference in the merged
    /// view, or `None` once every source is exhausted.
    ///
    /// When exactly one name is live at the heap's head (the common
    /// case of scanning a lightly-stacked set of tables) the drain loop
    /// below terminates immediately on its first peek — no separate
    /// single-table fast path is needed to get that behavior.
    pub fn next(&mut self) -> Result<Option<Ref>> {
        loop {
            let Some(top) = self.heap.pop() else {
                return Ok(None);
            };
            let winning_name = top.name.clone();
            Self::push_next(&mut self.cursors, &mut self.heap, top.source)?;

            while let Some(peek) = self.heap.peek() {
                if peek.name != winning_name {
                    break;
                }
                let shadowed = self.heap.pop().expect("peek just confirmed an entry");
                Self::push_next(&mut self.cursors, &mut self.heap, shadowed.source)?;
            }

            let record = top.record;
            if !self.include_deletes && record.is_deletion() {
                continue;
            }
            return Ok(Some(record));
        }
    }
}

struct LogHeapEntry {
    refname: String,
    update_index: u64,
    source: usize,
    record: LogRecord,
}

impl PartialEq for LogHeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.refname == other.refname && self.update_index == other.update_index && self.source == other.source
    }
}
impl Eq for LogHeapEntry {}

impl PartialOrd for LogHeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LogHeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .refname
            .cmp(&self.refname)
            .then_with(|| self.update_index.cmp(&other.update_index))
            .then_with(|| self.source.cmp(&other.source))
    }
}

/// Merged view over the log sections of every table in a stack.
/// Shadowing is keyed by the full `(refname, updateIndex)` pair, not
/// just the name: distinct updateIndexes for the same ref are separate
/// history entries, not shadow candidates.
pub struct MergedLogCursor<S> {
    cursors: Vec<LogCursor<S>>,
    heap: BinaryHeap<LogHeapEntry>,
    include_deletes: bool,
}

impl<S: BlockSource> MergedLogCursor<S> {
    pub(crate) fn new(mut cursors: Vec<LogCursor<S>>, include_deletes: bool) -> Result<Self> {
        let mut heap = BinaryHeap::new();
        for source in 0..cursors.len() {
            Self::push_next(&mut cursors, &mut heap, source)?;
        }
        Ok(Self {
            cursors,
            heap,
            include_deletes,
        })
    }

    fn push_next(cursors: &mut [LogCursor<S>], heap: &mut BinaryHeap<LogHeapEntry>, source: usize) -> Result<()> {
        if let Some(record) = cursors[source].next()? {
            heap.push(LogHeapEntry {
                refname: record.refname.clone(),
                update_index: record.update_index,
                source,
                record,
            });
        }
        Ok(())
    }

    /// Advances to and returns the next visible reflog entry in the
    /// merged view.
    pub fn next(&mut self) -> Result<Option<LogRecord>> {
        loop {
            let Some(top) = self.heap.pop() else {
                return Ok(None);
            };
            let (winning_name, winning_index) = (top.refname.clone(), top.update_index);
            Self::push_next(&mut self.cursors, &mut self.heap, top.source)?;

            while let Some(peek) = self.heap.peek() {
                if peek.refname != winning_name || peek.update_index != winning_index {
                    break;
                }
                let shadowed = self.heap.pop().expect("peek just confirmed an entry");
                Self::push_next(&mut self.cursors, &mut self.heap, shadowed.source)?;
            }

            let record = top.record;
            if !self.include_deletes && record.is_deletion() {
                continue;
            }
            return Ok(Some(record));
        }
    }
}
