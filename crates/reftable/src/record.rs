//! The reftable data model: references, reflog entries, and
//! object-index records.

use crate::framing::ObjectId;

/// Where a reference's data physically lives. `New` also marks deletion
/// tombstones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Loaded from an on-disk (already-written) table.
    Packed,
    /// Produced by the current batch, not yet committed to a table.
    New,
}

/// The four shapes a reference's value can take. Every call site
/// switches on this exhaustively rather than treating it as open-ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefValue {
    /// A deletion tombstone: no object ID, `storage == New`.
    Deletion,
    /// A plain reference pointing directly at one object.
    Unpeeled(ObjectId),
    /// An annotated tag reference: the tag object itself, plus the
    /// peeled (dereferenced) target it ultimately points to.
    Peeled {
        /// The annotated tag object.
        tag: ObjectId,
        /// The object the tag ultimately points to.
        target: ObjectId,
    },
    /// A symbolic reference naming another reference by string.
    Symbolic(String),
}

impl RefValue {
    /// Returns the value-type nibble (low 3 bits of `suffixAndType`)
    /// this variant encodes as in a ref block.
    #[must_use]
    pub fn type_nibble(&self) -> u8 {
        match self {
            RefValue::Deletion => 0,
            RefValue::Unpeeled(_) => 1,
            RefValue::Peeled { .. } => 2,
            RefValue::Symbolic(_) => 3,
        }
    }

    /// Returns the primary object ID a peeled/unpeeled ref points at,
    /// used for object-index construction. Peeled refs are indexed by
    /// their peeled target, not the tag object itself.
    #[must_use]
    pub fn indexable_object_id(&self) -> Option<ObjectId> {
        match self {
            RefValue::Unpeeled(id) => Some(*id),
            RefValue::Peeled { target, .. } => Some(*target),
            RefValue::Deletion | RefValue::Symbolic(_) => None,
        }
    }
}

/// A single reference as stored in (or read from) a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ref {
    /// Slash-delimited, UTF-8 name. Sort order is plain byte comparison.
    pub name: String,
    /// Storage origin.
    pub storage: Storage,
    /// 64-bit monotone transaction counter of the batch that wrote this
    /// revision.
    pub update_index: u64,
    /// The reference's value.
    pub value: RefValue,
}

impl Ref {
    /// Returns `true` if this is a deletion tombstone.
    #[must_use]
    pub fn is_deletion(&self) -> bool {
        matches!(self.value, RefValue::Deletion)
    }

    /// Default-visibility filter: hides deletion tombstones the way
    /// table and merged-reader cursors do unless "include deletes" is
    /// requested.
    #[must_use]
    pub fn is_visible_by_default(&self) -> bool {
        !self.is_deletion()
    }
}

/// Payload carried by a live (non-deleting) reflog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogData {
    /// The object the ref pointed at before this update.
    pub old_id: ObjectId,
    /// The object the ref points at after this update.
    pub new_id: ObjectId,
    /// Author name.
    pub name: String,
    /// Author email.
    pub email: String,
    /// Seconds since epoch.
    pub time_secs: u64,
    /// Timezone offset, in minutes.
    pub tz_minutes: i16,
    /// Free-form commit/update message.
    pub message: String,
}

/// A single reflog entry, keyed by `(refname, updateIndex)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// The reference this log entry is about.
    pub refname: String,
    /// The update that produced (or deleted) this entry.
    pub update_index: u64,
    /// `None` marks a deletion: this entry hides a prior entry at the
    /// same key and carries no payload.
    pub data: Option<LogData>,
}

impl LogRecord {
    /// Returns `true` if this entry is a deletion/shadow marker.
    #[must_use]
    pub fn is_deletion(&self) -> bool {
        self.data.is_none()
    }

    /// Builds the physical on-disk key: `refname || 0x00 ||
    /// bigendian(bit-complement of updateIndex)`. This is what makes
    /// entries for one refname sort by descending `updateIndex`.
    #[must_use]
    pub fn physical_key(refname: &str, update_index: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(refname.len() + 1 + 8);
        key.extend_from_slice(refname.as_bytes());
        key.push(0);
        key.extend_from_slice(&(!update_index).to_be_bytes());
        key
    }
}

/// The value stored for one truncated object-ID key in the object
/// section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectListValue {
    /// Ascending, deduplicated ref-section block offsets where
    /// references to this object may be found.
    Positions(Vec<u64>),
    /// The list would overflow a single entry's encoding; callers must
    /// fall back to a full ref-section scan.
    ScanRequired,
}

/// One entry in the object section: truncated object-ID key to a
/// position list (or scan-required marker).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    /// Shortest unique byte prefix of the object ID for this table.
    pub id_prefix: Vec<u8>,
    /// The list (or scan-required marker).
    pub value: ObjectListValue,
}

/// One entry in an index block: the last key of a lower-level block,
/// mapped to that block's file offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    /// Last key contained in the indexed child block.
    pub last_key: Vec<u8>,
    /// File offset of the child block.
    pub child_block_position: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_physical_key_orders_descending_by_update_index() {
        let a = LogRecord::physical_key("refs/heads/main", 7);
        let b = LogRecord::physical_key("refs/heads/main", 9);
        let c = LogRecord::physical_key("refs/heads/main", 11);
        // Higher updateIndex must sort first (ascending byte order on
        // bit-complement means smaller complement = larger index).
        assert!(c < b);
        assert!(b < a);
    }

    #[test]
    fn log_physical_key_orders_by_refname_first() {
        let a = LogRecord::physical_key("refs/heads/a", 100);
        let b = LogRecord::physical_key("refs/heads/b", 1);
        assert!(a < b);
    }
}
