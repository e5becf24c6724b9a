//! Whole-table round-trip tests: write a table through
//! [`TableWriter`](super::TableWriter), read it back through
//! [`TableReader`](super::TableReader), and check the boundary
//! scenarios a merged stack and a batch update both rely on.

mod boundary_tests;
