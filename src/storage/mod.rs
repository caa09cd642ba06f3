//! Page layout, page operations, and the tree built from them.

/// Slotted pages and the B-tree over them.
pub mod btree;

mod options;

pub use options::{PageOptions, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE};
