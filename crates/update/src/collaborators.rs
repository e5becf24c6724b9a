//! External collaborators the batch-update pipeline depends on but does
//! not implement: object-store existence/peeling and fast-forward
//! classification delegate to the hosting repository; time and author
//! identity come from the caller's clock.
//!
//! These are declared as traits rather than concrete types so the core
//! pipeline stays free of any dependency on an actual object database or
//! revision walker.

use reftable::ObjectId;

/// The hosting repository's object store and history, as far as the
/// batch-update pipeline needs them.
pub trait Repository {
    /// Returns `true` if `id` exists in the object store. Used during
    /// pre-validation to reject commands that target a missing object.
    fn object_exists(&self, id: &ObjectId) -> Result<bool, String>;

    /// If `id` names an annotated tag, returns the object it ultimately
    /// points to (peeled). Returns `None` for any other object kind.
    /// Used while writing post-images so a tag update is stored as a
    /// peeled (2-ID) ref rather than an unpeeled one.
    fn peel_tag(&self, id: &ObjectId) -> Result<Option<ObjectId>, String>;

    /// Classifies whether advancing a ref from `old` to `new` is a
    /// fast-forward (`new` is a descendant of `old` in the revision
    /// graph). Delegated to the revision walker; the pipeline itself
    /// has no notion of commit history.
    fn is_fast_forward(&self, old: &ObjectId, new: &ObjectId) -> Result<bool, String>;
}

/// A monotone clock and author-identity supplier used only to stamp
/// reflog entries.
pub trait Clock {
    /// Current time, in seconds since the Unix epoch.
    fn now_secs(&self) -> u64;
}

/// A [`Repository`] that always reports objects present, never peels,
/// and accepts every update as a fast-forward. Useful for tests and for
/// callers that perform their own object/history validation upstream
/// and want the pipeline to skip it.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveRepository;

impl Repository for PermissiveRepository {
    fn object_exists(&self, _id: &ObjectId) -> Result<bool, String> {
        Ok(true)
    }

    fn peel_tag(&self, _id: &ObjectId) -> Result<Option<ObjectId>, String> {
        Ok(None)
    }

    fn is_fast_forward(&self, _old: &ObjectId, _new: &ObjectId) -> Result<bool, String> {
        Ok(true)
    }
}

/// A [`Clock`] backed by [`std::time::SystemTime`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}
