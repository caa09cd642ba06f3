use serde::Deserialize;

use crate::storage::btree::page::{CELL_SLOT_SIZE, HDR_SIZE};
use crate::types::{Result, SlottedError};

/// Page size used when no configuration is supplied.
pub const DEFAULT_PAGE_SIZE: usize = 512;

/// Smallest page that still holds four maximal payloads plus their slots.
pub const MIN_PAGE_SIZE: usize = HDR_SIZE + 8 * CELL_SLOT_SIZE;

/// Largest page addressable with the `u16` offsets stored on-page.
pub const MAX_PAGE_SIZE: usize = u16::MAX as usize;

/// Configuration shared by every page of a tree.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PageOptions {
    /// Total size in bytes of every page buffer.
    pub page_size: usize,
    /// Whether `set` defragments and retries when free bytes exist but are fragmented.
    pub defrag_on_fragmentation: bool,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            defrag_on_fragmentation: true,
        }
    }
}

impl PageOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the page size in bytes.
    pub fn page_size(mut self, bytes: usize) -> Self {
        self.page_size = bytes;
        self
    }

    /// Enables or disables the defragment-and-retry path in `set`.
    pub fn defrag_on_fragmentation(mut self, enabled: bool) -> Self {
        self.defrag_on_fragmentation = enabled;
        self
    }

    /// Parses options from a TOML document and validates them.
    ///
    /// ```
    /// use slotted::storage::PageOptions;
    ///
    /// let opts = PageOptions::from_toml_str("page_size = 1024").unwrap();
    /// assert_eq!(opts.page_size, 1024);
    /// assert!(opts.defrag_on_fragmentation);
    /// ```
    pub fn from_toml_str(src: &str) -> Result<Self> {
        let opts: Self = toml::from_str(src).map_err(|err| SlottedError::Config(err.to_string()))?;
        opts.validate()?;
        Ok(opts)
    }

    /// Checks that the page size fits the on-page offset width and minimum capacity.
    pub fn validate(&self) -> Result<()> {
        if self.page_size < MIN_PAGE_SIZE {
            return Err(SlottedError::Config(format!(
                "page_size {} below minimum {MIN_PAGE_SIZE}",
                self.page_size
            )));
        }
        if self.page_size > MAX_PAGE_SIZE {
            return Err(SlottedError::Config(format!(
                "page_size {} above maximum {MAX_PAGE_SIZE}",
                self.page_size
            )));
        }
        Ok(())
    }

    /// Bytes available after the header (`PAGE_DATA_SIZE`).
    pub fn data_capacity(&self) -> usize {
        self.page_size.saturating_sub(HDR_SIZE)
    }

    /// Largest `key_size + data_size` a single cell may carry.
    pub fn max_payload(&self) -> usize {
        self.data_capacity() / 4
    }
}
