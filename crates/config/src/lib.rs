//! # reftable-config
//!
//! Writer/reader configuration for the reftable storage engine.
//!
//! Mirrors the knob set declared by the reftable file format: block
//! sizing, restart density, index fan-out, block alignment, and whether
//! an object-ID index is built. All fields have sensible defaults so a
//! caller can write `WriterOptions::default()` and get a file that
//! matches the reference format.
//!
//! ## Example
//!
//! ```rust
//! use reftable_config::WriterOptions;
//!
//! let opts = WriterOptions::default()
//!     .ref_block_size(4096)
//!     .index_objects(false);
//! assert_eq!(opts.log_block_size(), 8192);
//! ```

/// Maximum size of a single block, imposed by the 24-bit block-length
/// field in the block header.
pub const MAX_BLOCK_SIZE: u32 = (1 << 24) - 1;

/// Restart interval used when `refBlockSize < 60 KiB`.
const SMALL_BLOCK_RESTART_INTERVAL: u16 = 16;

/// Restart interval used when `refBlockSize >= 60 KiB`.
const LARGE_BLOCK_RESTART_INTERVAL: u16 = 64;

/// Threshold, in bytes, between the "small" and "large" restart interval
/// default.
const LARGE_BLOCK_THRESHOLD: u32 = 60 * 1024;

/// Hard cap on the number of restart points a block may record (the
/// restart count is stored as a `u16`).
pub const MAX_RESTART_COUNT: usize = u16::MAX as usize;

/// Writer-side configuration, shared by the reader for interpreting a
/// table written with these options.
///
/// Every field has a default matching the reference format. Setters are
/// chainable and consume `self`, builder-style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterOptions {
    ref_block_size: u32,
    log_block_size: Option<u32>,
    restart_interval: Option<u16>,
    max_index_levels: u32,
    align_blocks: bool,
    index_objects: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            ref_block_size: 4096,
            log_block_size: None,
            restart_interval: None,
            max_index_levels: 0,
            align_blocks: true,
            index_objects: true,
        }
    }
}

impl WriterOptions {
    /// Sets the ref-block size in bytes. Must be `<= `[`MAX_BLOCK_SIZE`].
    ///
    /// Defaults to 4096.
    #[must_use]
    pub fn ref_block_size(mut self, bytes: u32) -> Self {
        self.ref_block_size = bytes;
        self
    }

    /// Sets the log-block size in bytes. Defaults to `2 * ref_block_size`
    /// when unset.
    #[must_use]
    pub fn log_block_size(mut self, bytes: u32) -> Self {
        self.log_block_size = Some(bytes);
        self
    }

    /// Sets the number of entries between restart points.
    ///
    /// Defaults to 16 when `ref_block_size < 60 KiB`, else 64.
    #[must_use]
    pub fn restart_interval(mut self, entries: u16) -> Self {
        self.restart_interval = Some(entries);
        self
    }

    /// Caps the number of index levels the writer may stack. `0` means
    /// unlimited (stack until a level fits in a single block).
    #[must_use]
    pub fn max_index_levels(mut self, levels: u32) -> Self {
        self.max_index_levels = levels;
        self
    }

    /// Enables or disables padding ref blocks to the next block-size
    /// boundary. Defaults to `true`.
    #[must_use]
    pub fn align_blocks(mut self, align: bool) -> Self {
        self.align_blocks = align;
        self
    }

    /// Enables or disables building the object-ID → ref-block index.
    /// Defaults to `true`.
    #[must_use]
    pub fn index_objects(mut self, index: bool) -> Self {
        self.index_objects = index;
        self
    }

    /// Returns the configured ref-block size.
    #[must_use]
    pub fn ref_block_size(&self) -> u32 {
        self.ref_block_size
    }

    /// Returns the log-block size, defaulting to `2 * ref_block_size`.
    #[must_use]
    pub fn log_block_size(&self) -> u32 {
        self.log_block_size.unwrap_or(self.ref_block_size * 2)
    }

    /// Returns the restart interval, applying the size-dependent default.
    #[must_use]
    pub fn restart_interval(&self) -> u16 {
        self.restart_interval.unwrap_or(if self.ref_block_size < LARGE_BLOCK_THRESHOLD {
            SMALL_BLOCK_RESTART_INTERVAL
        } else {
            LARGE_BLOCK_RESTART_INTERVAL
        })
    }

    /// Returns the configured index-level cap (`0` = unlimited).
    #[must_use]
    pub fn max_index_levels(&self) -> u32 {
        self.max_index_levels
    }

    /// Returns whether ref blocks are padded to block-size boundaries.
    #[must_use]
    pub fn align_blocks(&self) -> bool {
        self.align_blocks
    }

    /// Returns whether the object-ID index is built.
    #[must_use]
    pub fn index_objects(&self) -> bool {
        self.index_objects
    }
}
