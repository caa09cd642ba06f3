use std::cmp::Ordering;
use std::convert::TryFrom;
use std::ops::Deref;

use smallvec::SmallVec;

use crate::primitives::bytes::{read_u16, read_u32, write_u16, write_u32};
use crate::storage::btree::compare::KeyComparator;
use crate::storage::btree::directory::{self, CellDirectory, CellSlot, DirectoryView};
use crate::storage::btree::freeblock::{FreeBlock, FreeBlockList};
use crate::storage::PageOptions;
use crate::types::{PageId, Result, SlottedError};

/// Number of bytes used by the fixed page header.
pub const HDR_SIZE: usize = 16;

/// Size in bytes of a single cell directory entry (`key_size:u32 | data_size:u32 | offset:u16 | pad`).
pub const CELL_SLOT_SIZE: usize = 12;

/// Size in bytes of a single stored free-block descriptor (`start:u16 | end:u16`).
pub const FREEBLOCK_SLOT_SIZE: usize = 4;

const PAGE_ID_OFFSET: usize = 0;
const RIGHTMOST_OFFSET: usize = 4;
const CELL_COUNT_OFFSET: usize = 8;
const FREEBLOCK_COUNT_OFFSET: usize = 10;
const FREESPACE_OFFSET: usize = 12;
const IS_LEAF_OFFSET: usize = 14;

/// Header metadata decoded from the first [`HDR_SIZE`] bytes of a page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    /// Id of this page.
    pub page_id: PageId,
    /// Child to the right of the last cell (internal pages only).
    pub rightmost: PageId,
    /// Number of entries in the cell directory.
    pub cell_count: u16,
    /// Number of entries in the free-block list, the anchor included.
    ///
    /// Only `freeblock_count - 1` descriptors are stored on the page; the anchor's is implicit.
    pub freeblock_count: u16,
    /// Cached total of free bytes across all free blocks.
    pub freespace: u16,
    /// Whether the page is a leaf.
    pub is_leaf: bool,
}

impl Header {
    /// Decodes and bounds-checks the header stored in `page`.
    pub fn parse(page: &[u8]) -> Result<Self> {
        if page.len() < HDR_SIZE {
            return Err(SlottedError::Corruption("page shorter than header"));
        }
        let is_leaf = match page[IS_LEAF_OFFSET] {
            0 => false,
            1 => true,
            _ => return Err(SlottedError::Corruption("unknown page kind flag")),
        };
        let header = Self {
            page_id: PageId(read_u32(page, PAGE_ID_OFFSET)),
            rightmost: PageId(read_u32(page, RIGHTMOST_OFFSET)),
            cell_count: read_u16(page, CELL_COUNT_OFFSET),
            freeblock_count: read_u16(page, FREEBLOCK_COUNT_OFFSET),
            freespace: read_u16(page, FREESPACE_OFFSET),
            is_leaf,
        };
        if header.freeblock_count == 0 {
            return Err(SlottedError::Corruption("free-block list lost its anchor"));
        }
        let meta_end = header.meta_end();
        if meta_end > page.len() {
            return Err(SlottedError::Corruption("page metadata exceeds page"));
        }
        if header.freespace as usize > page.len() - meta_end {
            return Err(SlottedError::Corruption("cached freespace exceeds data region"));
        }
        Ok(header)
    }

    /// Offset one past the last stored free-block descriptor; the anchor block starts here.
    pub fn meta_end(&self) -> usize {
        self.directory_end() + (self.freeblock_count as usize).saturating_sub(1) * FREEBLOCK_SLOT_SIZE
    }

    /// Offset one past the last cell directory entry.
    pub fn directory_end(&self) -> usize {
        HDR_SIZE + self.cell_count as usize * CELL_SLOT_SIZE
    }

    pub(crate) fn write(&self, page: &mut [u8]) {
        write_u32(page, PAGE_ID_OFFSET, self.page_id.0);
        write_u32(page, RIGHTMOST_OFFSET, self.rightmost.0);
        write_u16(page, CELL_COUNT_OFFSET, self.cell_count);
        write_u16(page, FREEBLOCK_COUNT_OFFSET, self.freeblock_count);
        write_u16(page, FREESPACE_OFFSET, self.freespace);
        page[IS_LEAF_OFFSET] = u8::from(self.is_leaf);
        page[IS_LEAF_OFFSET + 1] = 0;
    }
}

/// Borrowed view of a key or data range inside a page.
///
/// The borrow ties the view to the page, so it cannot outlive the next mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Value<'a> {
    offset: usize,
    bytes: &'a [u8],
}

impl<'a> Value<'a> {
    /// Byte offset of the view inside the page buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The viewed bytes.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }
}

impl Deref for Value<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.bytes
    }
}

/// A fixed-size slotted page: header, cell directory, free-block list, and payload data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page {
    pub(crate) buf: Box<[u8]>,
    pub(crate) options: PageOptions,
}

impl Page {
    /// Allocates a zeroed page with a single free block spanning the data region.
    pub fn new(page_id: PageId, options: PageOptions, is_leaf: bool) -> Result<Self> {
        options.validate()?;
        let mut page = Self {
            buf: vec![0u8; options.page_size].into_boxed_slice(),
            options,
        };
        page.reset(page_id, PageId(0), is_leaf)?;
        Ok(page)
    }

    /// Wraps an existing page image after validating its layout.
    pub fn from_bytes(bytes: Vec<u8>, options: PageOptions) -> Result<Self> {
        options.validate()?;
        if bytes.len() != options.page_size {
            return Err(SlottedError::Invalid("page image does not match page size"));
        }
        let page = Self {
            buf: bytes.into_boxed_slice(),
            options,
        };
        page.check_layout()?;
        Ok(page)
    }

    /// Raw page image.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the page and returns its image.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf.into_vec()
    }

    /// Options the page was created with.
    pub fn options(&self) -> &PageOptions {
        &self.options
    }

    /// Decodes the page header.
    pub fn header(&self) -> Result<Header> {
        Header::parse(&self.buf)
    }

    /// Id stored in the header.
    pub fn id(&self) -> PageId {
        PageId(read_u32(&self.buf, PAGE_ID_OFFSET))
    }

    /// Child to the right of the last cell.
    pub fn rightmost(&self) -> PageId {
        PageId(read_u32(&self.buf, RIGHTMOST_OFFSET))
    }

    /// Updates the rightmost child pointer.
    pub fn set_rightmost(&mut self, page: PageId) {
        write_u32(&mut self.buf, RIGHTMOST_OFFSET, page.0);
    }

    /// Whether the page is a leaf.
    pub fn is_leaf(&self) -> bool {
        self.buf[IS_LEAF_OFFSET] == 1
    }

    /// Number of cells stored on the page.
    pub fn cell_count(&self) -> usize {
        read_u16(&self.buf, CELL_COUNT_OFFSET) as usize
    }

    /// Number of free-block list entries, the anchor included.
    pub fn freeblock_count(&self) -> usize {
        read_u16(&self.buf, FREEBLOCK_COUNT_OFFSET) as usize
    }

    /// Cached total of free bytes.
    pub fn freespace(&self) -> usize {
        read_u16(&self.buf, FREESPACE_OFFSET) as usize
    }

    /// Free bytes available once every free range and spare descriptor is coalesced.
    pub fn estimate_freespace_after_defrag(&self) -> usize {
        self.freespace() + self.freeblock_count().saturating_sub(1) * FREEBLOCK_SLOT_SIZE
    }

    /// Returns the decoded free-block list, anchor first.
    pub fn free_blocks(&self) -> Result<Vec<FreeBlock>> {
        let header = self.header()?;
        let list = FreeBlockList::decode(&self.buf, &header)?;
        Ok(list.iter().copied().collect())
    }

    /// Returns the directory entry at `idx`.
    pub fn slot(&self, idx: usize) -> Result<CellSlot> {
        self.directory().slot_checked(idx)
    }

    /// Key bytes of the cell at `idx`.
    pub fn key_at(&self, idx: usize) -> Result<Value<'_>> {
        let slot = self.slot(idx)?;
        Ok(Value {
            offset: slot.offset as usize,
            bytes: slot.key(&self.buf),
        })
    }

    /// Data bytes of the cell at `idx`.
    pub fn data_at(&self, idx: usize) -> Result<Value<'_>> {
        let slot = self.slot(idx)?;
        Ok(Value {
            offset: slot.data_offset(),
            bytes: slot.data(&self.buf),
        })
    }

    /// Looks up the data stored under `key`.
    pub fn get(&self, key: &[u8], cmp: &dyn KeyComparator) -> Result<Option<Value<'_>>> {
        match directory::find(&self.directory(), &self.buf, key, cmp) {
            Some(idx) => self.data_at(idx).map(Some),
            None => Ok(None),
        }
    }

    /// Index of the first cell whose key is strictly greater than `key`.
    pub fn upper_bound(&self, key: &[u8], cmp: &dyn KeyComparator) -> usize {
        directory::upper_bound(&self.directory(), &self.buf, key, cmp)
    }

    /// Iterates over `(key, data)` pairs in directory order.
    pub fn cells(&self) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        let view = self.directory();
        (0..view.len()).map(move |idx| {
            let slot = view.slot(idx);
            (slot.key(&self.buf), slot.data(&self.buf))
        })
    }

    /// Verifies every structural invariant plus key order under `cmp`.
    pub fn check_invariants(&self, cmp: &dyn KeyComparator) -> Result<()> {
        self.check_layout()?;
        let view = self.directory();
        for idx in 1..view.len() {
            let prev = view.slot(idx - 1).key(&self.buf);
            let next = view.slot(idx).key(&self.buf);
            if cmp.compare(prev, next) != Ordering::Less {
                return Err(SlottedError::Corruption("cell directory out of key order"));
            }
        }
        Ok(())
    }

    /// Verifies the byte accounting of the page independent of key order.
    pub fn check_layout(&self) -> Result<()> {
        let header = self.header()?;
        let cells = CellDirectory::decode(&self.buf, &header)?;
        let free = FreeBlockList::decode(&self.buf, &header)?;
        if free.total() != free.recompute_total() {
            return Err(SlottedError::Corruption("cached freespace disagrees with free blocks"));
        }
        if free.total() != header.freespace as usize {
            return Err(SlottedError::Corruption("header freespace disagrees with free blocks"));
        }
        let payload: usize = cells.iter().map(CellSlot::payload_len).sum();
        if header.meta_end() + free.total() + payload != self.buf.len() {
            return Err(SlottedError::Corruption("page bytes do not add up"));
        }
        // Free blocks and payloads must tile the data region exactly.
        let mut ranges: SmallVec<[(usize, usize); 64]> = SmallVec::new();
        ranges.extend(
            free.iter()
                .filter(|block| !block.is_empty())
                .map(|block| (block.start as usize, block.end as usize)),
        );
        ranges.extend(cells.iter().map(|slot| (slot.offset as usize, slot.end())));
        ranges.sort_unstable();
        let mut cursor = header.meta_end();
        for (start, end) in ranges {
            if start != cursor {
                return Err(SlottedError::Corruption("data region has a gap or overlap"));
            }
            cursor = end;
        }
        if cursor != self.buf.len() {
            return Err(SlottedError::Corruption("data region does not reach page end"));
        }
        Ok(())
    }

    pub(crate) fn directory(&self) -> DirectoryView<'_> {
        DirectoryView::new(&self.buf, self.cell_count())
    }

    /// Clears the page back to its freshly allocated state, keeping the buffer.
    pub(crate) fn reset(&mut self, page_id: PageId, rightmost: PageId, is_leaf: bool) -> Result<()> {
        self.buf.fill(0);
        let freespace = u16::try_from(self.buf.len() - HDR_SIZE)
            .map_err(|_| SlottedError::Invalid("page larger than u16 offsets"))?;
        Header {
            page_id,
            rightmost,
            cell_count: 0,
            freeblock_count: 1,
            freespace,
            is_leaf,
        }
        .write(&mut self.buf);
        Ok(())
    }
}
