//! Slotted B-tree pages with a first-fit free-block allocator.
//!
//! A [`storage::btree::Page`] is a fixed-size buffer holding a header, a sorted
//! cell directory, a free-block list, and key/data payloads packed against the
//! page end. Pages support lookup, insert, in-place overwrite, delete,
//! defragmentation, and halving splits. [`storage::btree::BTree`] assembles
//! pages into a tree over an in-memory [`primitives::pager::MemPager`].

#![warn(missing_docs)]

pub mod primitives;
pub mod storage;
pub mod types;
