use std::convert::TryFrom;

use smallvec::SmallVec;
use tracing::trace;

use crate::primitives::bytes::{read_u16, write_u16};
use crate::storage::btree::page::{Header, CELL_SLOT_SIZE, FREEBLOCK_SLOT_SIZE};
use crate::types::{Result, SlottedError};

const INLINE_FREE_BLOCKS: usize = 16;

/// Half-open range `[start, end)` of unused page bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FreeBlock {
    /// First free byte.
    pub start: u16,
    /// One past the last free byte.
    pub end: u16,
}

impl FreeBlock {
    /// Number of free bytes in the block.
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    /// Whether the block holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// In-memory free-block list of one page.
///
/// Entry 0 is the anchor: it always begins where page metadata ends, absorbs
/// metadata growth and shrinkage at its low end, and is never removed. Its
/// descriptor is not stored; the anchor length is whatever the cached
/// `freespace` counter leaves after the stored descriptors are summed.
#[derive(Clone, Debug)]
pub(crate) struct FreeBlockList {
    blocks: SmallVec<[FreeBlock; INLINE_FREE_BLOCKS]>,
    total: usize,
}

impl FreeBlockList {
    pub(crate) fn decode(page: &[u8], header: &Header) -> Result<Self> {
        let count = header.freeblock_count as usize;
        let meta_end = header.meta_end();
        let base = header.directory_end();
        let mut blocks: SmallVec<[FreeBlock; INLINE_FREE_BLOCKS]> = SmallVec::with_capacity(count);
        blocks.push(FreeBlock {
            start: 0,
            end: 0,
        });
        let mut stored = 0usize;
        for idx in 1..count {
            let at = base + (idx - 1) * FREEBLOCK_SLOT_SIZE;
            let block = FreeBlock {
                start: read_u16(page, at),
                end: read_u16(page, at + 2),
            };
            if block.start >= block.end {
                return Err(SlottedError::Corruption("empty or inverted free block"));
            }
            if block.end as usize > page.len() {
                return Err(SlottedError::Corruption("free block exceeds page"));
            }
            stored += block.len();
            blocks.push(block);
        }
        let total = header.freespace as usize;
        let anchor_len = total
            .checked_sub(stored)
            .ok_or(SlottedError::Corruption("free blocks exceed cached freespace"))?;
        blocks[0] = FreeBlock {
            start: to_offset(meta_end)?,
            end: to_offset(meta_end + anchor_len)?,
        };
        for pair in blocks.windows(2) {
            if pair[0].end >= pair[1].start {
                return Err(SlottedError::Corruption("free blocks unordered or not coalesced"));
            }
        }
        if blocks[count - 1].end as usize > page.len() {
            return Err(SlottedError::Corruption("free block exceeds page"));
        }
        Ok(Self { blocks, total })
    }

    /// Writes every non-anchor descriptor starting at `at`.
    pub(crate) fn encode(&self, page: &mut [u8], at: usize) {
        for (idx, block) in self.blocks.iter().skip(1).enumerate() {
            let base = at + idx * FREEBLOCK_SLOT_SIZE;
            write_u16(page, base, block.start);
            write_u16(page, base + 2, block.end);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.blocks.len()
    }

    pub(crate) fn anchor(&self) -> FreeBlock {
        self.blocks[0]
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &FreeBlock> {
        self.blocks.iter()
    }

    /// Cached sum of free bytes.
    pub(crate) fn total(&self) -> usize {
        self.total
    }

    pub(crate) fn recompute_total(&self) -> usize {
        self.blocks.iter().map(FreeBlock::len).sum()
    }

    /// Free bytes once every hole is merged and the spare descriptors are returned.
    pub(crate) fn estimate_after_defrag(&self) -> usize {
        self.total + (self.blocks.len() - 1) * FREEBLOCK_SLOT_SIZE
    }

    /// Takes `size` bytes from the high end of the lowest block that can hold them.
    ///
    /// Returns the offset one past the allocated range.
    pub(crate) fn alloc_bytes(&mut self, size: usize) -> Option<u16> {
        if size == 0 {
            return None;
        }
        let idx = self.blocks.iter().position(|block| block.len() >= size)?;
        let block = &mut self.blocks[idx];
        let end = block.end;
        // size <= block.len() <= u16::MAX
        block.end -= size as u16;
        self.total -= size;
        if idx > 0 && self.blocks[idx].is_empty() {
            self.blocks.remove(idx);
            self.release_front(FREEBLOCK_SLOT_SIZE);
        }
        trace!(
            target: "slotted::freeblock",
            size,
            block = idx,
            end,
            "allocated bytes"
        );
        Some(end)
    }

    /// Returns `[start, end)` to the list, merging with adjacent blocks.
    pub(crate) fn dealloc_bytes(&mut self, start: usize, end: usize) -> Result<()> {
        if start >= end {
            return Err(SlottedError::Invalid("empty range cannot be freed"));
        }
        let (start, end) = (to_offset(start)?, to_offset(end)?);
        if start < self.blocks[0].end {
            return Err(SlottedError::Corruption("freed range overlaps page metadata"));
        }
        let pos = self.blocks.partition_point(|block| block.start <= start);
        let prev = self.blocks[pos - 1];
        if prev.end > start {
            return Err(SlottedError::Corruption("freed range overlaps a free block"));
        }
        let next = self.blocks.get(pos).copied();
        if let Some(next) = next {
            if end > next.start {
                return Err(SlottedError::Corruption("freed range overlaps a free block"));
            }
        }
        let touches_prev = prev.end == start;
        let touches_next = next.map_or(false, |next| next.start == end);
        match (touches_prev, touches_next, next) {
            (true, true, Some(next)) => {
                self.blocks[pos - 1].end = next.end;
                self.blocks.remove(pos);
                self.release_front(FREEBLOCK_SLOT_SIZE);
            }
            (true, _, _) => self.blocks[pos - 1].end = end,
            (false, true, _) => self.blocks[pos].start = start,
            (false, false, _) => {
                if !self.reserve_front(FREEBLOCK_SLOT_SIZE) {
                    return Err(SlottedError::NotEnoughSpace);
                }
                self.blocks.insert(pos, FreeBlock { start, end });
            }
        }
        self.total += (end - start) as usize;
        trace!(
            target: "slotted::freeblock",
            start,
            end,
            blocks = self.blocks.len(),
            "freed bytes"
        );
        Ok(())
    }

    /// Claims one cell directory slot from the low end of the anchor.
    pub(crate) fn reserve_cell_slot(&mut self) -> Result<()> {
        if self.reserve_front(CELL_SLOT_SIZE) {
            Ok(())
        } else {
            Err(SlottedError::FreeBlockNotFound)
        }
    }

    /// Hands a vacated cell directory slot back to the anchor.
    pub(crate) fn release_cell_slot(&mut self) {
        self.release_front(CELL_SLOT_SIZE);
    }

    /// Replaces the list with a single anchor spanning `[start, end)`.
    pub(crate) fn collapse(&mut self, start: usize, end: usize) -> Result<()> {
        let anchor = FreeBlock {
            start: to_offset(start)?,
            end: to_offset(end)?,
        };
        if anchor.start > anchor.end {
            return Err(SlottedError::Corruption("collapsed anchor is inverted"));
        }
        self.blocks.clear();
        self.blocks.push(anchor);
        self.total = anchor.len();
        Ok(())
    }

    fn reserve_front(&mut self, bytes: usize) -> bool {
        let anchor = &mut self.blocks[0];
        if anchor.len() < bytes {
            return false;
        }
        anchor.start += bytes as u16;
        self.total -= bytes;
        true
    }

    fn release_front(&mut self, bytes: usize) {
        self.blocks[0].start -= bytes as u16;
        self.total += bytes;
    }
}

fn to_offset(value: usize) -> Result<u16> {
    u16::try_from(value).map_err(|_| SlottedError::Corruption("offset exceeds u16"))
}
