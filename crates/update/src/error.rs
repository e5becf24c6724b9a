//! Error type for the batch-update pipeline: failures that
//! abort the whole pipeline, as distinct from [`crate::CommandStatus`],
//! which annotates individual commands.

use thiserror::Error;

/// Errors that can abort a [`crate::BatchUpdate::apply`] call outright,
/// rather than being attributed to one command.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// The stack's write lock could not be acquired. Carries no payload
    /// beyond the variant itself; per spec §7 this also doubles as the
    /// per-command rejection reason when an atomic batch aborts before
    /// writing.
    #[error("lock failure: could not acquire the stack write lock")]
    LockFailure,

    /// A collaborator (object store, clock, fast-forward classifier)
    /// reported a failure that isn't specific to one command.
    #[error("collaborator error: {0}")]
    Collaborator(String),

    /// Propagated from the reftable core (framing, block, or writer
    /// errors encountered while producing the new table).
    #[error(transparent)]
    Reftable(#[from] reftable::ReftableError),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, UpdateError>;
