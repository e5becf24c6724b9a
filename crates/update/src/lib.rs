//! # reftable-update
//!
//! The batch-update pipeline: turns a list of
//! intended reference mutations into validation against a [`Stack`]'s
//! merged view, then one freshly-written table.
//!
//! This crate does not publish the table it writes onto a stack —
//! appending a finished table and taking the stack's write lock around
//! the whole validate-and-write window are a storage-specific handoff
//! (spec §1, §5) the caller performs. What this crate guarantees is the
//! validation order and the per-command status bookkeeping: pre-
//! validation against the object store, non-fast-forward
//! classification, expected-value matching, name-conflict detection,
//! and finally the write itself.
//!
//! [`Stack`]: reftable_stack::Stack

mod collaborators;
mod command;
mod error;
mod pipeline;

pub use collaborators::{Clock, PermissiveRepository, Repository, SystemClock};
pub use command::{Command, CommandStatus, ExpectedValue, LogRequest, NewValue};
pub use error::{Result, UpdateError};
pub use pipeline::{BatchOutcome, BatchUpdate};
