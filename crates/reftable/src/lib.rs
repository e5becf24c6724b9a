//! # reftable
//!
//! Block-structured, content-addressed, append-only storage for Git
//! references and their reflogs.
//!
//! A table is an immutable file: once written it is never modified, only
//! superseded by a newer table layered on top of it in a stack (see the
//! sibling `stack` crate). Reads are served directly off disk through a
//! [`block_source::BlockSource`]; nothing is paged into an in-memory index
//! up front except the 24-byte file header.
//!
//! ## File layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ HEADER (24 bytes)                                              │
//! │                                                                │
//! │ magic "REFT" | version (u8) | ref_block_size (u24)             │
//! │ min_update_index (u64) | max_update_index (u64)                │
//! ├──────────────────────────────────────────────────────────────┤
//! │ REF BLOCKS ('r')       — sorted, prefix-compressed ref entries │
//! ├──────────────────────────────────────────────────────────────┤
//! │ REF INDEX ('i')        — present once the ref section spans    │
//! │                          more than a handful of blocks          │
//! ├──────────────────────────────────────────────────────────────┤
//! │ OBJECT BLOCKS ('o')    — object-id prefix -> ref block offsets │
//! ├──────────────────────────────────────────────────────────────┤
//! │ OBJECT INDEX ('i')                                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │ LOG BLOCKS ('g')       — DEFLATE-compressed reflog entries      │
//! ├──────────────────────────────────────────────────────────────┤
//! │ LOG INDEX ('i')                                                │
//! ├──────────────────────────────────────────────────────────────┤
//! │ FOOTER (68 bytes)                                               │
//! │                                                                │
//! │ header copy (24) | ref_index_offset (u64)                      │
//! │ object_offset<<5|object_id_len (u64) | object_index_offset (u64)│
//! │ log_offset (u64) | log_index_offset (u64) | crc32 (u32)         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every block shares the same 4-byte header (type tag + 24-bit length)
//! and restart-point layout; see [`block`] for the shared framing and
//! [`table`] for how blocks are assembled into a whole file.

pub mod block;
pub mod block_source;
pub mod error;
pub mod framing;
pub mod output_stream;
pub mod record;
pub mod table;

pub use block_source::{BlockSource, FileBlockSource, MemoryBlockSource};
pub use error::{ReftableError, Result};
pub use framing::ObjectId;
pub use record::{LogData, LogRecord, ObjectListValue, ObjectRecord, Ref, RefValue, Storage};
pub use table::{LogCursor, RefCursor, TableReader, TableWriter};

pub use reftable_config::WriterOptions;
