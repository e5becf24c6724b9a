//! Input and outcome types for one ref mutation within a batch (spec
//! §4.10, C10).

use reftable::ObjectId;

/// What a command expects the ref's current value to be, checked
/// against the merged view before the command is allowed to proceed
/// (spec §4.10 phase 3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedValue {
    /// The ref must not currently exist (a plain creation).
    Missing,
    /// The ref must currently resolve to exactly this object ID.
    Id(ObjectId),
    /// The ref must currently be a symbolic reference to exactly this
    /// target name (compared byte-for-byte, per spec §4.10 phase 3).
    Symbolic(String),
}

/// The post-image a command wants to write, or a deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewValue {
    /// Delete the ref, writing a tombstone.
    Delete,
    /// Point the ref directly at `id`. If `id` names an annotated tag,
    /// the pipeline peels it via [`crate::Repository::peel_tag`] and
    /// stores the post-image as a peeled (2-ID) ref instead of an
    /// unpeeled one.
    Direct(ObjectId),
    /// Make the ref a symbolic alias for another reference name.
    Symbolic(String),
}

/// Reflog metadata for one command. When present, the pipeline appends
/// exactly one log entry for this command at the batch's allocated
/// `updateIndex` (spec §4.10 phase 5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRequest {
    /// Author/committer name.
    pub author_name: String,
    /// Author/committer email.
    pub author_email: String,
    /// Timezone offset, in minutes, applied to the command's timestamp.
    pub tz_minutes: i16,
    /// Free-form update message.
    pub message: String,
}

/// One intended ref mutation within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The reference name this command targets.
    pub refname: String,
    /// What the ref's current value must be for this command to
    /// proceed. `None` skips the expected-value check entirely (a
    /// forced write).
    pub expected_old: Option<ExpectedValue>,
    /// The post-image to write, or [`NewValue::Delete`].
    pub new_value: NewValue,
    /// If `true`, skips the non-fast-forward classification (spec
    /// §4.10 phase 2) for this command.
    pub allow_non_fast_forward: bool,
    /// Reflog metadata, if this command should append a log entry.
    pub log: Option<LogRequest>,
}

impl Command {
    /// Builds a plain, unconditional direct-update command: no expected
    /// value, fast-forward checking enabled, no reflog entry.
    #[must_use]
    pub fn direct(refname: impl Into<String>, id: ObjectId) -> Self {
        Self {
            refname: refname.into(),
            expected_old: None,
            new_value: NewValue::Direct(id),
            allow_non_fast_forward: false,
            log: None,
        }
    }

    /// Builds an unconditional deletion command.
    #[must_use]
    pub fn delete(refname: impl Into<String>) -> Self {
        Self {
            refname: refname.into(),
            expected_old: None,
            new_value: NewValue::Delete,
            allow_non_fast_forward: true,
            log: None,
        }
    }

    /// Attaches reflog metadata to this command, builder-style.
    #[must_use]
    pub fn with_log(mut self, log: LogRequest) -> Self {
        self.log = Some(log);
        self
    }

    /// Marks this command as exempt from the non-fast-forward check,
    /// builder-style.
    #[must_use]
    pub fn allow_non_fast_forward(mut self) -> Self {
        self.allow_non_fast_forward = true;
        self
    }

    /// Requires the ref's current value to equal `expected`,
    /// builder-style.
    #[must_use]
    pub fn expect(mut self, expected: ExpectedValue) -> Self {
        self.expected_old = Some(expected);
        self
    }

    /// `true` if this command is a plain creation: it requires the ref
    /// to currently be missing, and is not a deletion.
    #[must_use]
    pub(crate) fn is_pure_creation(&self) -> bool {
        !matches!(self.new_value, NewValue::Delete)
    }
}

/// The outcome of one command after a batch has run (spec §7, §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// The command was never evaluated — the batch aborted before
    /// reaching it (atomic mode) or was never scheduled.
    NotAttempted,
    /// The command's post-image was written to the new table.
    Ok,
    /// The stack's write lock could not be acquired, or (atomic mode)
    /// a sibling command's rejection aborted the whole batch before any
    /// write occurred.
    LockFailure,
    /// Rejected by the non-fast-forward check (spec §4.10 phase 2).
    RejectedNonFastForward,
    /// Rejected during pre-validation: the new value names an object
    /// the store does not have (spec §4.10 phase 1).
    MissingObject,
    /// Rejected for any other reason: expected-value mismatch, name
    /// conflict, or duplicate refname within the batch (spec §4.10
    /// phases 3-4).
    RejectedOtherReason,
}

impl CommandStatus {
    /// `true` if this status represents a successfully applied command.
    #[must_use]
    pub fn is_ok(self) -> bool {
        matches!(self, CommandStatus::Ok)
    }
}
