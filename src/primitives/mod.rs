//! Low-level building blocks shared by the storage layer.

pub mod bytes;
pub mod pager;
