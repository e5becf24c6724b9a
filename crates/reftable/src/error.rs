//! Error kinds surfaced by the reftable core.

use thiserror::Error;

/// Errors the reftable core can return. Callers are expected to match on
/// these variants rather than treat them as opaque.
#[derive(Debug, Error)]
pub enum ReftableError {
    /// File does not start with the `REFT` magic.
    #[error("invalid magic: not a reftable file")]
    InvalidMagic,

    /// The header declares an unsupported version byte.
    #[error("invalid version: {0}")]
    InvalidVersion(u8),

    /// Footer CRC-32 did not match the computed checksum.
    #[error("invalid footer CRC-32")]
    InvalidCrc,

    /// A short read where a full block/header/footer was expected.
    #[error("truncated read: expected {expected} bytes, got {got}")]
    TruncatedRead {
        /// Bytes the reader needed.
        expected: usize,
        /// Bytes actually available.
        got: usize,
    },

    /// Malformed block header, unknown block type in a position that
    /// requires one, or a varint stream underflow.
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// The writer could not fit a single entry in the configured block
    /// size. Carries the minimum size that would have sufficed so the
    /// caller can retry with a larger block size.
    #[error("block size too small: need at least {min_size} bytes")]
    BlockSizeTooSmall {
        /// Minimum byte count that would fit the offending entry.
        min_size: usize,
    },

    /// The writer received entries out of ascending order, or two equal
    /// keys in a context that forbids duplicates.
    #[error("order violation: {previous:?} must sort before {next:?}")]
    OrderViolation {
        /// The previously written key.
        previous: Vec<u8>,
        /// The key that violated ordering.
        next: Vec<u8>,
    },

    /// A ref's `updateIndex` fell outside the table's declared
    /// `[min, max]` range.
    #[error("update index {index} out of range [{min}, {max}]")]
    UpdateIndexOutOfRange {
        /// The offending index.
        index: u64,
        /// Table's declared minimum.
        min: u64,
        /// Table's declared maximum.
        max: u64,
    },

    /// Opaque pass-through from the block source/sink.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReftableError>;
