#![forbid(unsafe_code)]

//! Slotted page format, the page editor, and the B-tree that links pages.

/// Page layout constants, header decoding, and read access.
pub mod page;

mod compare;
mod defrag;
mod directory;
mod editor;
mod freeblock;
mod split;
mod stats;
mod tree;

pub use compare::{BinaryCollation, I32Keys, KeyComparator};
pub use directory::CellSlot;
pub use editor::{SetKind, SetOutcome};
pub use freeblock::FreeBlock;
pub use page::{Header, Page, Value};
pub use split::SplitOutcome;
pub use stats::{BTreeStats, BTreeStatsSnapshot};
pub use tree::BTree;
