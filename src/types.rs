//! Identifiers and the crate-wide error type.

use std::fmt;

/// Identifier of a page inside a [`crate::primitives::pager::MemPager`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct PageId(pub u32);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PageId {
    fn from(value: u32) -> Self {
        PageId(value)
    }
}

impl From<PageId> for u32 {
    fn from(value: PageId) -> Self {
        value.0
    }
}

/// Errors reported by the page layer and the tree built on top of it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SlottedError {
    /// `key_size + data_size` exceeds the per-page payload cap.
    #[error("payload of {size} bytes exceeds the {limit} byte cap")]
    PayloadTooBig {
        /// Size of the rejected payload.
        size: usize,
        /// Largest payload the page accepts.
        limit: usize,
    },
    /// The page cannot hold the request even after defragmentation.
    #[error("not enough space in page")]
    NotEnoughSpace,
    /// Total free bytes suffice but no free block (or anchor room) can take the request.
    #[error("no free block can satisfy the request")]
    FreeBlockNotFound,
    /// An on-page invariant does not hold.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// A caller supplied an argument the page layer cannot honour.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// The page table has no page with this id.
    #[error("page {0} not found")]
    PageNotFound(PageId),
    /// Configuration could not be parsed or validated.
    #[error("config: {0}")]
    Config(String),
}

impl SlottedError {
    /// Returns `true` when defragmentation or a split can make the request succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotEnoughSpace | Self::FreeBlockNotFound)
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SlottedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_space_errors_are_retryable() {
        assert!(SlottedError::NotEnoughSpace.is_retryable());
        assert!(SlottedError::FreeBlockNotFound.is_retryable());
        assert!(!SlottedError::PayloadTooBig { size: 40, limit: 28 }.is_retryable());
        assert!(!SlottedError::Corruption("x").is_retryable());
    }

    #[test]
    fn payload_too_big_renders_sizes() {
        let err = SlottedError::PayloadTooBig { size: 40, limit: 28 };
        assert_eq!(err.to_string(), "payload of 40 bytes exceeds the 28 byte cap");
    }
}
