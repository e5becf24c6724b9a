//! # reftable-stack
//!
//! A stack is an ordered list of reftable files, oldest first, with
//! the most recently published table last. Reads against the stack go
//! through a [`Stack`], which merge-joins every member's cursors so
//! that later tables shadow earlier ones. Writes go through
//! the sibling `reftable-update` crate, which appends new tables to a
//! stack under its own lock; compaction (§4.9) is implemented here in
//! [`Compactor`], which folds a contiguous suffix of the stack into a
//! single new table.

mod compactor;
mod merge;

pub use compactor::Compactor;
pub use merge::{MergedLogCursor, MergedRefCursor};

use reftable::{BlockSource, ObjectId, Ref, Result, TableReader};
use std::sync::Arc;

/// An ordered, read-only view over a set of tables layered on one
/// another. Index `0` is the oldest (base) table; the last entry is
/// the most recently published one and wins all shadowing.
pub struct Stack<S> {
    tables: Vec<Arc<TableReader<S>>>,
}

impl<S: BlockSource> Stack<S> {
    /// Wraps an ordered (oldest-first) list of table readers.
    #[must_use]
    pub fn new(tables: Vec<Arc<TableReader<S>>>) -> Self {
        Self { tables }
    }

    /// Number of tables currently in the stack.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns `true` if the stack has no tables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// The member tables, oldest first.
    #[must_use]
    pub fn tables(&self) -> &[Arc<TableReader<S>>] {
        &self.tables
    }

    /// The highest `updateIndex` written by any table in the stack, or
    /// `0` for an empty stack. Batch updates allocate the next write at
    /// `max_update_index() + 1`.
    #[must_use]
    pub fn max_update_index(&self) -> u64 {
        self.tables.iter().map(|t| t.max_update_index()).max().unwrap_or(0)
    }

    /// A merged cursor over every reference in the stack, in name
    /// order, newest table winning on collisions.
    pub fn merged_refs(&self, include_deletes: bool) -> Result<MergedRefCursor<S>> {
        let mut sources = Vec::with_capacity(self.tables.len());
        for reader in &self.tables {
            sources.push(Arc::clone(reader).ref_cursor(true)?);
        }
        MergedRefCursor::new(sources, include_deletes)
    }

    /// A merged cursor positioned at `name` (or its prefix range, if
    /// `name` ends with `/`).
    pub fn seek_ref(&self, name: &str, include_deletes: bool) -> Result<MergedRefCursor<S>> {
        let mut sources = Vec::with_capacity(self.tables.len());
        for reader in &self.tables {
            sources.push(Arc::clone(reader).seek_ref(name, true)?);
        }
        MergedRefCursor::new(sources, include_deletes)
    }

    /// The current live value of `name` in the merged view, or `None`
    /// if it does not exist or is shadowed by a deletion.
    pub fn exact_ref(&self, name: &str) -> Result<Option<Ref>> {
        let mut cursor = self.seek_ref(name, false)?;
        match cursor.next()? {
            Some(r) if r.name == name => Ok(Some(r)),
            _ => Ok(None),
        }
    }

    /// Every live reference pointing at `id`, resolved against the
    /// merged view.
    ///
    /// Each member table's own object index only proves "this name
    /// pointed at `id` as of that table"; a higher table may have
    /// retargeted the same name since. Every hit is therefore
    /// re-verified against [`Self::exact_ref`] before being trusted,
    /// and each name is checked at most once.
    pub fn refs_by_object_id(&self, id: &ObjectId) -> Result<Vec<Ref>> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for reader in &self.tables {
            for candidate in reader.refs_by_object_id(id)? {
                if !seen.insert(candidate.name.clone()) {
                    continue;
                }
                if let Some(current) = self.exact_ref(&candidate.name)? {
                    if current.value.indexable_object_id().as_ref() == Some(id) {
                        out.push(current);
                    }
                }
            }
        }
        Ok(out)
    }

    /// A merged cursor over every reflog entry in the stack.
    pub fn merged_logs(&self, include_deletes: bool) -> Result<MergedLogCursor<S>> {
        let mut sources = Vec::with_capacity(self.tables.len());
        for reader in &self.tables {
            sources.push(Arc::clone(reader).log_cursor(true)?);
        }
        MergedLogCursor::new(sources, include_deletes)
    }

    /// A merged cursor positioned at the most recent reflog entry for
    /// `refname` at or before `update_index`.
    pub fn seek_log(&self, refname: &str, update_index: u64, include_deletes: bool) -> Result<MergedLogCursor<S>> {
        let mut sources = Vec::with_capacity(self.tables.len());
        for reader in &self.tables {
            sources.push(Arc::clone(reader).seek_log(refname, update_index, true)?);
        }
        MergedLogCursor::new(sources, include_deletes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reftable::{MemoryBlockSource, RefValue, Storage, TableWriter};
    use reftable_config::WriterOptions;

    fn build_table(options: &WriterOptions, update_index: u64, refs: Vec<Ref>) -> Arc<TableReader<MemoryBlockSource>> {
        let bytes = TableWriter::write(Vec::new(), options, update_index, update_index, refs, Vec::new()).unwrap();
        Arc::new(TableReader::open(MemoryBlockSource::new(bytes)).unwrap())
    }

    fn unpeeled(name: &str, update_index: u64, byte: u8) -> Ref {
        Ref {
            name: name.to_string(),
            storage: Storage::Packed,
            update_index,
            value: RefValue::Unpeeled(ObjectId([byte; 20])),
        }
    }

    #[test]
    fn newer_table_shadows_older_one() {
        let options = WriterOptions::default();
        let base = build_table(&options, 1, vec![unpeeled("refs/heads/main", 1, 0xaa)]);
        let top = build_table(&options, 2, vec![unpeeled("refs/heads/main", 2, 0xbb)]);
        let stack = Stack::new(vec![base, top]);

        let resolved = stack.exact_ref("refs/heads/main").unwrap().unwrap();
        assert_eq!(resolved.update_index, 2);
        assert_eq!(resolved.value, RefValue::Unpeeled(ObjectId([0xbb; 20])));
    }

    #[test]
    fn deletion_in_newer_table_hides_older_live_ref() {
        let options = WriterOptions::default();
        let base = build_table(&options, 1, vec![unpeeled("refs/heads/x", 1, 0xaa)]);
        let tombstone = Ref {
            name: "refs/heads/x".to_string(),
            storage: Storage::New,
            update_index: 2,
            value: RefValue::Deletion,
        };
        let top = build_table(&options, 2, vec![tombstone]);
        let stack = Stack::new(vec![base, top]);

        assert!(stack.exact_ref("refs/heads/x").unwrap().is_none());

        let mut with_deletes = stack.merged_refs(true).unwrap();
        let first = with_deletes.next().unwrap().unwrap();
        assert!(first.is_deletion());
    }

    #[test]
    fn merged_scan_yields_names_in_order_across_tables() {
        let options = WriterOptions::default();
        let base = build_table(&options, 1, vec![unpeeled("refs/heads/a", 1, 1), unpeeled("refs/tags/v1", 1, 2)]);
        let top = build_table(&options, 2, vec![unpeeled("refs/heads/b", 2, 3)]);
        let stack = Stack::new(vec![base, top]);

        let mut cursor = stack.merged_refs(false).unwrap();
        let mut names = Vec::new();
        while let Some(r) = cursor.next().unwrap() {
            names.push(r.name);
        }
        assert_eq!(names, vec!["refs/heads/a", "refs/heads/b", "refs/tags/v1"]);
    }
}
