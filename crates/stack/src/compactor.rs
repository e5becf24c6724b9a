//! Compactor: folds a contiguous suffix of a stack into
//! one new table by re-emitting the merged view into a fresh writer.
//!
//! Mirrors the teacher engine's full-stack compaction — merge every
//! input in sorted order, stream the result into a writer rather than
//! materializing the union twice — generalized to accept a caller-
//! chosen suffix instead of always consuming the whole stack, and to
//! let the caller decide whether tombstones survive the fold.

use reftable::{BlockSource, TableReader, TableWriter};
use reftable_config::WriterOptions;
use std::io::Write;
use std::sync::Arc;

use crate::Stack;

/// Accumulates a contiguous suffix of a stack (oldest-accepted-first,
/// once built) under an optional byte budget, then folds it into one
/// table.
pub struct Compactor<S> {
    accepted: Vec<Arc<TableReader<S>>>,
    accepted_bytes: u64,
}

impl<S: BlockSource> Default for Compactor<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: BlockSource> Compactor<S> {
    /// Starts with an empty acceptance set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            accepted: Vec::new(),
            accepted_bytes: 0,
        }
    }

    /// Unconditionally prepends `table` (moving further down the
    /// stack) to the accepted set.
    pub fn add_first(&mut self, table: Arc<TableReader<S>>, size_bytes: u64) {
        self.accepted.insert(0, table);
        self.accepted_bytes += size_bytes;
    }

    /// Prepends `table` only if the accepted set's running byte total
    /// is still under `byte_budget`. Returns `false` (without
    /// accepting) once the budget is reached, so the caller can stop
    /// offering older tables.
    pub fn try_add_first(&mut self, table: Arc<TableReader<S>>, size_bytes: u64, byte_budget: u64) -> bool {
        if self.accepted_bytes >= byte_budget {
            return false;
        }
        self.add_first(table, size_bytes);
        true
    }

    /// Number of tables accepted so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accepted.len()
    }

    /// Returns `true` if no tables have been accepted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }

    /// Folds the accepted tables into a single new table written to
    /// `sink`.
    ///
    /// `include_deletes` controls whether tombstones survive the fold:
    /// a full-stack compaction should strip them (`false`), while a
    /// partial compaction whose suffix doesn't reach the stack's base
    /// must preserve them (`true`) so they keep shadowing whatever is
    /// left below.
    pub fn compact<W: Write>(&self, sink: W, options: &WriterOptions, include_deletes: bool) -> reftable::Result<W> {
        log::debug!(
            "compacting {} table(s), include_deletes={include_deletes}",
            self.accepted.len()
        );
        let min_update_index = self
            .accepted
            .iter()
            .map(|t| t.min_update_index())
            .min()
            .unwrap_or(0);
        let max_update_index = self
            .accepted
            .iter()
            .map(|t| t.max_update_index())
            .max()
            .unwrap_or(0);

        let stack = Stack::new(self.accepted.clone());

        let mut refs = Vec::new();
        let mut ref_cursor = stack.merged_refs(include_deletes)?;
        while let Some(r) = ref_cursor.next()? {
            refs.push(r);
        }

        let mut logs = Vec::new();
        let mut log_cursor = stack.merged_logs(include_deletes)?;
        while let Some(l) = log_cursor.next()? {
            logs.push(l);
        }

        log::info!(
            "compaction produced {} ref(s) and {} log entr(y/ies) spanning updateIndex [{min_update_index}, {max_update_index}]",
            refs.len(),
            logs.len()
        );

        // The merged cursors already yield refs in name order and logs
        // in ascending physical-key order, so the ordered writer path
        // applies directly — no re-sort needed.
        TableWriter::write(sink, options, min_update_index, max_update_index, refs, logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reftable::{MemoryBlockSource, ObjectId, Ref, RefValue, Storage};

    fn unpeeled(name: &str, update_index: u64, byte: u8) -> Ref {
        Ref {
            name: name.to_string(),
            storage: Storage::Packed,
            update_index,
            value: RefValue::Unpeeled(ObjectId([byte; 20])),
        }
    }

    fn build_table(options: &WriterOptions, update_index: u64, refs: Vec<Ref>) -> Arc<TableReader<MemoryBlockSource>> {
        let bytes = TableWriter::write(Vec::new(), options, update_index, update_index, refs, Vec::new()).unwrap();
        Arc::new(TableReader::open(MemoryBlockSource::new(bytes)).unwrap())
    }

    #[test]
    fn compacting_a_single_table_is_a_logical_no_op() {
        let options = WriterOptions::default();
        let table = build_table(&options, 1, vec![unpeeled("refs/heads/main", 1, 0xaa)]);

        let mut compactor: Compactor<MemoryBlockSource> = Compactor::new();
        compactor.add_first(table, 64);
        let bytes = compactor.compact(Vec::new(), &options, false).unwrap();

        let reader = TableReader::open(MemoryBlockSource::new(bytes)).unwrap();
        let mut cursor = Arc::new(reader).ref_cursor(false).unwrap();
        let r = cursor.next().unwrap().unwrap();
        assert_eq!(r.name, "refs/heads/main");
        assert!(cursor.next().unwrap().is_none());
    }

    #[test]
    fn full_compaction_strips_deletions() {
        let options = WriterOptions::default();
        let base = build_table(&options, 1, vec![unpeeled("refs/heads/x", 1, 1)]);
        let tombstone = Ref {
            name: "refs/heads/x".to_string(),
            storage: Storage::New,
            update_index: 2,
            value: RefValue::Deletion,
        };
        let top = build_table(&options, 2, vec![tombstone]);

        let mut compactor: Compactor<MemoryBlockSource> = Compactor::new();
        compactor.add_first(top, 64);
        compactor.add_first(base, 64);
        let bytes = compactor.compact(Vec::new(), &options, false).unwrap();

        let reader = TableReader::open(MemoryBlockSource::new(bytes)).unwrap();
        let mut cursor = Arc::new(reader).ref_cursor(true).unwrap();
        assert!(cursor.next().unwrap().is_none());
    }

    #[test]
    fn try_add_first_stops_once_budget_is_reached() {
        let options = WriterOptions::default();
        let t1 = build_table(&options, 1, vec![unpeeled("refs/heads/a", 1, 1)]);
        let t2 = build_table(&options, 2, vec![unpeeled("refs/heads/b", 2, 2)]);

        let mut compactor: Compactor<MemoryBlockSource> = Compactor::new();
        assert!(compactor.try_add_first(t2, 100, 150));
        assert!(!compactor.try_add_first(t1, 100, 150));
        assert_eq!(compactor.len(), 1);
    }
}
