//! The batch-update pipeline: validates a list of ref
//! mutations against a stack's merged view, then writes one new table
//! containing their post-images.
//!
//! Mirrors the teacher engine's write path (`engine::write`: validate,
//! stamp a sequence number, append, maybe flush) generalized from a
//! single key-value mutation to a whole batch of ref commands validated
//! together before any of them is committed.

use crate::collaborators::{Clock, Repository};
use crate::command::{Command, CommandStatus, ExpectedValue, NewValue};
use crate::error::{Result, UpdateError};
use reftable::{BlockSource, LogData, LogRecord, ObjectId, Ref, RefValue, Storage, TableWriter};
use reftable_config::WriterOptions;
use reftable_stack::Stack;
use std::collections::HashSet;
use std::io::Write;

/// A list of ref mutations to validate and commit together.
pub struct BatchUpdate {
    commands: Vec<Command>,
    atomic: bool,
}

/// The result of running a [`BatchUpdate`]: one status per input
/// command, in input order, plus the new table's bytes if anything was
/// written.
pub struct BatchOutcome<W> {
    /// Per-command outcome, parallel to the input command list.
    pub statuses: Vec<CommandStatus>,
    /// The `updateIndex` allocated for this batch. Present even if
    /// nothing ultimately survived to be written, since it's computed
    /// up front from the stack.
    pub update_index: u64,
    /// The new table's sink, returned once `TableWriter` has finished
    /// writing it. `None` if no command survived validation (nothing
    /// to write) or the batch was an all-reject atomic abort.
    pub table: Option<W>,
}

impl BatchUpdate {
    /// Starts an empty batch. `atomic = true` means any single
    /// rejection aborts every other command; `atomic = false` lets
    /// surviving commands proceed independently of rejected siblings.
    #[must_use]
    pub fn new(atomic: bool) -> Self {
        Self {
            commands: Vec::new(),
            atomic,
        }
    }

    /// Appends one command to the batch, builder-style.
    #[must_use]
    pub fn push(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    /// Number of commands queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// `true` if no commands have been queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Runs the full pipeline (spec §4.10 phases 1-5) against `stack`,
    /// writing survivors to `sink`.
    ///
    /// Publishing the returned table onto the stack (phase 6) is a
    /// storage-specific handoff the caller performs; this call only
    /// produces the bytes.
    pub fn apply<S, R, C, W>(
        self,
        stack: &Stack<S>,
        repo: &R,
        clock: &C,
        options: &WriterOptions,
        sink: W,
    ) -> Result<BatchOutcome<W>>
    where
        S: BlockSource,
        R: Repository,
        C: Clock,
        W: Write,
    {
        let commands = self.commands;
        let update_index = stack.max_update_index() + 1;
        let mut statuses = vec![CommandStatus::NotAttempted; commands.len()];
        let mut current_before: Vec<Option<Ref>> = vec![None; commands.len()];

        reject_duplicate_refnames(&commands, &mut statuses);

        // Phase 1: pre-validation against the object store.
        for (i, cmd) in commands.iter().enumerate() {
            if !matches!(statuses[i], CommandStatus::NotAttempted) {
                continue;
            }
            if let NewValue::Direct(id) = &cmd.new_value {
                match repo.object_exists(id) {
                    Ok(true) => {}
                    Ok(false) => statuses[i] = CommandStatus::MissingObject,
                    Err(e) => return Err(UpdateError::Collaborator(e)),
                }
            }
        }

        // Fetch each command's pre-batch current value once; phases 2
        // and 3 both need it, and phase 5's reflog entries reuse it.
        for (i, cmd) in commands.iter().enumerate() {
            current_before[i] = stack
                .exact_ref(&cmd.refname)
                .map_err(UpdateError::Reftable)?;
        }

        // Phase 2: non-fast-forward check.
        for (i, cmd) in commands.iter().enumerate() {
            if !matches!(statuses[i], CommandStatus::NotAttempted) || cmd.allow_non_fast_forward {
                continue;
            }
            let NewValue::Direct(new_id) = &cmd.new_value else {
                continue;
            };
            let Some(old_id) = current_before[i]
                .as_ref()
                .and_then(|r| r.value.indexable_object_id())
            else {
                // No prior object-id value: a creation, or an update of
                // a symbolic/missing ref. Fast-forward classification
                // doesn't apply.
                continue;
            };
            match repo.is_fast_forward(&old_id, new_id) {
                Ok(true) => {}
                Ok(false) => statuses[i] = CommandStatus::RejectedNonFastForward,
                Err(e) => return Err(UpdateError::Collaborator(e)),
            }
        }

        // Phase 3: expected-value check.
        for (i, cmd) in commands.iter().enumerate() {
            if !matches!(statuses[i], CommandStatus::NotAttempted) {
                continue;
            }
            let Some(expected) = &cmd.expected_old else {
                continue;
            };
            if !expected_value_matches(expected, current_before[i].as_ref()) {
                statuses[i] = CommandStatus::RejectedOtherReason;
            }
        }

        // Phase 4: name-conflict check, scoped to commands that are
        // genuine creations (no pre-batch value) and still unrejected.
        check_name_conflicts(&commands, &current_before, &mut statuses, stack)?;

        // Atomic mode: any rejection voids the whole batch.
        let any_rejected = statuses
            .iter()
            .any(|s| !matches!(s, CommandStatus::NotAttempted));
        if self.atomic && any_rejected {
            for s in &mut statuses {
                if matches!(s, CommandStatus::NotAttempted) {
                    *s = CommandStatus::LockFailure;
                }
            }
            return Ok(BatchOutcome {
                statuses,
                update_index,
                table: None,
            });
        }

        // Phase 5: write survivors.
        let mut refs = Vec::new();
        let mut logs = Vec::new();
        let mut survivor_idx = Vec::new();
        for (i, cmd) in commands.iter().enumerate() {
            if !matches!(statuses[i], CommandStatus::NotAttempted) {
                continue;
            }
            let value = match &cmd.new_value {
                NewValue::Delete => RefValue::Deletion,
                NewValue::Symbolic(target) => RefValue::Symbolic(target.clone()),
                NewValue::Direct(id) => match repo.peel_tag(id) {
                    Ok(Some(target)) => RefValue::Peeled { tag: *id, target },
                    Ok(None) => RefValue::Unpeeled(*id),
                    Err(e) => return Err(UpdateError::Collaborator(e)),
                },
            };
            let new_id = match &cmd.new_value {
                NewValue::Direct(id) => *id,
                NewValue::Delete | NewValue::Symbolic(_) => ObjectId::ZERO,
            };
            if let Some(log) = &cmd.log {
                let old_id = current_before[i]
                    .as_ref()
                    .and_then(|r| r.value.indexable_object_id())
                    .unwrap_or(ObjectId::ZERO);
                logs.push(LogRecord {
                    refname: cmd.refname.clone(),
                    update_index,
                    data: Some(LogData {
                        old_id,
                        new_id,
                        name: log.author_name.clone(),
                        email: log.author_email.clone(),
                        time_secs: clock.now_secs(),
                        tz_minutes: log.tz_minutes,
                        message: log.message.clone(),
                    }),
                });
            }
            refs.push(Ref {
                name: cmd.refname.clone(),
                storage: Storage::New,
                update_index,
                value,
            });
            survivor_idx.push(i);
        }

        if refs.is_empty() {
            return Ok(BatchOutcome {
                statuses,
                update_index,
                table: None,
            });
        }

        refs.sort_by(|a, b| a.name.cmp(&b.name));
        logs.sort_by(|a, b| a.refname.cmp(&b.refname));

        log::info!(
            "batch update: writing {} ref(s) and {} log entr(y/ies) at updateIndex {update_index}",
            refs.len(),
            logs.len()
        );
        let table = TableWriter::write(sink, options, update_index, update_index, refs, logs)
            .map_err(UpdateError::Reftable)?;

        // Per spec §9's open question: surviving commands become `Ok`
        // only now that the table has actually been written.
        for i in survivor_idx {
            statuses[i] = CommandStatus::Ok;
        }

        Ok(BatchOutcome {
            statuses,
            update_index,
            table: Some(table),
        })
    }
}

fn reject_duplicate_refnames(commands: &[Command], statuses: &mut [CommandStatus]) {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut dupes: HashSet<&str> = HashSet::new();
    for cmd in commands {
        if !seen.insert(cmd.refname.as_str()) {
            dupes.insert(cmd.refname.as_str());
        }
    }
    if dupes.is_empty() {
        return;
    }
    for (i, cmd) in commands.iter().enumerate() {
        if dupes.contains(cmd.refname.as_str()) {
            statuses[i] = CommandStatus::RejectedOtherReason;
        }
    }
}

fn expected_value_matches(expected: &ExpectedValue, current: Option<&Ref>) -> bool {
    match expected {
        ExpectedValue::Missing => current.is_none(),
        ExpectedValue::Id(want) => match current {
            Some(r) => match &r.value {
                RefValue::Unpeeled(id) => id == want,
                RefValue::Peeled { tag, .. } => tag == want,
                RefValue::Symbolic(_) | RefValue::Deletion => false,
            },
            None => false,
        },
        ExpectedValue::Symbolic(want) => match current {
            Some(r) => matches!(&r.value, RefValue::Symbolic(target) if target == want),
            None => false,
        },
    }
}

/// Ancestors of `name` by `/`-delimited segment, excluding `name`
/// itself: `"refs/heads/foo/bar"` yields `["refs", "refs/heads",
/// "refs/heads/foo"]`.
fn ancestors(name: &str) -> Vec<&str> {
    name.match_indices('/').map(|(idx, _)| &name[..idx]).collect()
}

fn check_name_conflicts<S: BlockSource>(
    commands: &[Command],
    current_before: &[Option<Ref>],
    statuses: &mut [CommandStatus],
    stack: &Stack<S>,
) -> Result<()> {
    let has_creation = commands
        .iter()
        .enumerate()
        .any(|(i, c)| matches!(statuses[i], CommandStatus::NotAttempted) && c.is_pure_creation() && current_before[i].is_none());
    if !has_creation {
        return Ok(());
    }

    let deleted_in_batch: HashSet<&str> = commands
        .iter()
        .enumerate()
        .filter(|(i, c)| matches!(statuses[*i], CommandStatus::NotAttempted) && matches!(c.new_value, NewValue::Delete))
        .map(|(_, c)| c.refname.as_str())
        .collect();

    let mut added: HashSet<String> = HashSet::new();

    for (i, cmd) in commands.iter().enumerate() {
        if !matches!(statuses[i], CommandStatus::NotAttempted) {
            continue;
        }
        if !cmd.is_pure_creation() || current_before[i].is_some() {
            continue;
        }
        let name = cmd.refname.as_str();

        for ancestor in ancestors(name) {
            let live = (is_existing_live(stack, ancestor)? && !deleted_in_batch.contains(ancestor))
                || added.contains(ancestor);
            if live {
                statuses[i] = CommandStatus::RejectedOtherReason;
                break;
            }
        }
        if !matches!(statuses[i], CommandStatus::NotAttempted) {
            continue;
        }

        let prefix = format!("{name}/");
        let blocked_by_descendant = added.iter().any(|a| a.starts_with(prefix.as_str()))
            || has_live_descendant(stack, &prefix, &deleted_in_batch)?;
        if blocked_by_descendant {
            statuses[i] = CommandStatus::RejectedOtherReason;
            continue;
        }

        added.insert(name.to_string());
    }
    Ok(())
}

fn is_existing_live<S: BlockSource>(stack: &Stack<S>, name: &str) -> Result<bool> {
    Ok(stack.exact_ref(name).map_err(UpdateError::Reftable)?.is_some())
}

fn has_live_descendant<S: BlockSource>(
    stack: &Stack<S>,
    prefix: &str,
    deleted_in_batch: &HashSet<&str>,
) -> Result<bool> {
    let mut cursor = stack.seek_ref(prefix, false).map_err(UpdateError::Reftable)?;
    while let Some(r) = cursor.next().map_err(UpdateError::Reftable)? {
        if !deleted_in_batch.contains(r.name.as_str()) {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{PermissiveRepository, SystemClock};
    use crate::command::LogRequest;
    use reftable::MemoryBlockSource;
    use reftable::TableReader;
    use std::sync::Arc;

    fn empty_stack() -> Stack<MemoryBlockSource> {
        let options = WriterOptions::default();
        let bytes = TableWriter::write(Vec::new(), &options, 1, 1, Vec::new(), Vec::new()).unwrap();
        let reader = Arc::new(TableReader::open(MemoryBlockSource::new(bytes)).unwrap());
        Stack::new(vec![reader])
    }

    fn stack_with(refs: Vec<Ref>) -> Stack<MemoryBlockSource> {
        let options = WriterOptions::default();
        let bytes = TableWriter::write(Vec::new(), &options, 1, 1, refs, Vec::new()).unwrap();
        let reader = Arc::new(TableReader::open(MemoryBlockSource::new(bytes)).unwrap());
        Stack::new(vec![reader])
    }

    #[test]
    fn creates_a_ref_and_writes_ok_status() {
        let stack = empty_stack();
        let batch = BatchUpdate::new(true).push(Command::direct(
            "refs/heads/main",
            ObjectId::from_slice(&[0x11; 20]).unwrap(),
        ));
        let outcome = batch
            .apply(&stack, &PermissiveRepository, &SystemClock, &WriterOptions::default(), Vec::new())
            .unwrap();
        assert_eq!(outcome.statuses, vec![CommandStatus::Ok]);
        assert!(outcome.table.is_some());
        assert_eq!(outcome.update_index, 2);
    }

    #[test]
    fn missing_object_is_rejected_and_nothing_is_written_atomically() {
        let stack = empty_stack();
        struct NoObjects;
        impl Repository for NoObjects {
            fn object_exists(&self, _id: &ObjectId) -> std::result::Result<bool, String> {
                Ok(false)
            }
            fn peel_tag(&self, _id: &ObjectId) -> std::result::Result<Option<ObjectId>, String> {
                Ok(None)
            }
            fn is_fast_forward(&self, _o: &ObjectId, _n: &ObjectId) -> std::result::Result<bool, String> {
                Ok(true)
            }
        }
        let batch = BatchUpdate::new(true).push(Command::direct(
            "refs/heads/main",
            ObjectId::from_slice(&[0x11; 20]).unwrap(),
        ));
        let outcome = batch
            .apply(&stack, &NoObjects, &SystemClock, &WriterOptions::default(), Vec::new())
            .unwrap();
        assert_eq!(outcome.statuses, vec![CommandStatus::MissingObject]);
        assert!(outcome.table.is_none());
    }

    #[test]
    fn atomic_batch_aborts_all_on_one_rejection() {
        let stack = empty_stack();
        let batch = BatchUpdate::new(true)
            .push(Command::direct("refs/heads/a", ObjectId::from_slice(&[1; 20]).unwrap()))
            .push(
                Command::direct("refs/heads/b", ObjectId::from_slice(&[2; 20]).unwrap())
                    .expect(ExpectedValue::Id(ObjectId::from_slice(&[9; 20]).unwrap())),
            );
        let outcome = batch
            .apply(&stack, &PermissiveRepository, &SystemClock, &WriterOptions::default(), Vec::new())
            .unwrap();
        assert_eq!(outcome.statuses[1], CommandStatus::RejectedOtherReason);
        assert_eq!(outcome.statuses[0], CommandStatus::LockFailure);
        assert!(outcome.table.is_none());
    }

    #[test]
    fn non_atomic_batch_lets_survivors_proceed() {
        let stack = empty_stack();
        let batch = BatchUpdate::new(false)
            .push(Command::direct("refs/heads/a", ObjectId::from_slice(&[1; 20]).unwrap()))
            .push(
                Command::direct("refs/heads/b", ObjectId::from_slice(&[2; 20]).unwrap())
                    .expect(ExpectedValue::Id(ObjectId::from_slice(&[9; 20]).unwrap())),
            );
        let outcome = batch
            .apply(&stack, &PermissiveRepository, &SystemClock, &WriterOptions::default(), Vec::new())
            .unwrap();
        assert_eq!(outcome.statuses[0], CommandStatus::Ok);
        assert_eq!(outcome.statuses[1], CommandStatus::RejectedOtherReason);
        assert!(outcome.table.is_some());
    }

    #[test]
    fn name_conflict_rejects_child_of_existing_ref() {
        let stack = stack_with(vec![Ref {
            name: "refs/heads/foo".to_string(),
            storage: Storage::Packed,
            update_index: 1,
            value: RefValue::Unpeeled(ObjectId::from_slice(&[1; 20]).unwrap()),
        }]);
        let batch = BatchUpdate::new(true).push(Command::direct(
            "refs/heads/foo/bar",
            ObjectId::from_slice(&[2; 20]).unwrap(),
        ));
        let outcome = batch
            .apply(&stack, &PermissiveRepository, &SystemClock, &WriterOptions::default(), Vec::new())
            .unwrap();
        assert_eq!(outcome.statuses[0], CommandStatus::RejectedOtherReason);
    }

    #[test]
    fn name_conflict_rejects_ref_that_is_a_prefix_of_existing() {
        let stack = stack_with(vec![Ref {
            name: "refs/heads/foo/bar".to_string(),
            storage: Storage::Packed,
            update_index: 1,
            value: RefValue::Unpeeled(ObjectId::from_slice(&[1; 20]).unwrap()),
        }]);
        let batch = BatchUpdate::new(true).push(Command::direct(
            "refs/heads/foo",
            ObjectId::from_slice(&[2; 20]).unwrap(),
        ));
        let outcome = batch
            .apply(&stack, &PermissiveRepository, &SystemClock, &WriterOptions::default(), Vec::new())
            .unwrap();
        assert_eq!(outcome.statuses[0], CommandStatus::RejectedOtherReason);
    }

    #[test]
    fn deleting_and_recreating_a_conflicting_ref_in_one_batch_is_allowed() {
        let stack = stack_with(vec![Ref {
            name: "refs/heads/foo".to_string(),
            storage: Storage::Packed,
            update_index: 1,
            value: RefValue::Unpeeled(ObjectId::from_slice(&[1; 20]).unwrap()),
        }]);
        let batch = BatchUpdate::new(true)
            .push(Command::delete("refs/heads/foo"))
            .push(Command::direct(
                "refs/heads/foo/bar",
                ObjectId::from_slice(&[2; 20]).unwrap(),
            ));
        let outcome = batch
            .apply(&stack, &PermissiveRepository, &SystemClock, &WriterOptions::default(), Vec::new())
            .unwrap();
        assert_eq!(outcome.statuses, vec![CommandStatus::Ok, CommandStatus::Ok]);
    }

    #[test]
    fn duplicate_refname_in_batch_is_rejected() {
        let stack = empty_stack();
        let batch = BatchUpdate::new(false)
            .push(Command::direct("refs/heads/a", ObjectId::from_slice(&[1; 20]).unwrap()))
            .push(Command::direct("refs/heads/a", ObjectId::from_slice(&[2; 20]).unwrap()));
        let outcome = batch
            .apply(&stack, &PermissiveRepository, &SystemClock, &WriterOptions::default(), Vec::new())
            .unwrap();
        assert_eq!(
            outcome.statuses,
            vec![CommandStatus::RejectedOtherReason, CommandStatus::RejectedOtherReason]
        );
    }

    #[test]
    fn non_fast_forward_update_is_rejected_unless_allowed() {
        let stack = stack_with(vec![Ref {
            name: "refs/heads/main".to_string(),
            storage: Storage::Packed,
            update_index: 1,
            value: RefValue::Unpeeled(ObjectId::from_slice(&[1; 20]).unwrap()),
        }]);
        struct NeverFastForward;
        impl Repository for NeverFastForward {
            fn object_exists(&self, _id: &ObjectId) -> std::result::Result<bool, String> {
                Ok(true)
            }
            fn peel_tag(&self, _id: &ObjectId) -> std::result::Result<Option<ObjectId>, String> {
                Ok(None)
            }
            fn is_fast_forward(&self, _o: &ObjectId, _n: &ObjectId) -> std::result::Result<bool, String> {
                Ok(false)
            }
        }
        let batch = BatchUpdate::new(true).push(Command::direct(
            "refs/heads/main",
            ObjectId::from_slice(&[2; 20]).unwrap(),
        ));
        let outcome = batch
            .apply(&stack, &NeverFastForward, &SystemClock, &WriterOptions::default(), Vec::new())
            .unwrap();
        assert_eq!(outcome.statuses[0], CommandStatus::RejectedNonFastForward);

        let batch2 = BatchUpdate::new(true).push(
            Command::direct("refs/heads/main", ObjectId::from_slice(&[2; 20]).unwrap())
                .allow_non_fast_forward(),
        );
        let outcome2 = batch2
            .apply(&stack, &NeverFastForward, &SystemClock, &WriterOptions::default(), Vec::new())
            .unwrap();
        assert_eq!(outcome2.statuses[0], CommandStatus::Ok);
    }

    #[test]
    fn reflog_entry_is_appended_when_requested() {
        let stack = empty_stack();
        let batch = BatchUpdate::new(true).push(
            Command::direct("refs/heads/main", ObjectId::from_slice(&[1; 20]).unwrap()).with_log(LogRequest {
                author_name: "A U Thor".to_string(),
                author_email: "author@example.com".to_string(),
                tz_minutes: 0,
                message: "create main".to_string(),
            }),
        );
        let outcome = batch
            .apply(&stack, &PermissiveRepository, &SystemClock, &WriterOptions::default(), Vec::new())
            .unwrap();
        let bytes = outcome.table.unwrap();
        let reader = Arc::new(TableReader::open(MemoryBlockSource::new(bytes)).unwrap());
        let mut logs = reader.log_cursor(false).unwrap();
        let entry = logs.next().unwrap().unwrap();
        assert_eq!(entry.refname, "refs/heads/main");
        assert_eq!(entry.data.unwrap().message, "create main");
    }
}
