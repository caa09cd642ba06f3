use std::cmp::Ordering;

use smallvec::SmallVec;

use crate::primitives::bytes::{read_u16, read_u32, write_u16, write_u32};
use crate::storage::btree::compare::KeyComparator;
use crate::storage::btree::page::{Header, CELL_SLOT_SIZE, HDR_SIZE};
use crate::types::{Result, SlottedError};

const INLINE_SLOTS: usize = 32;

/// One cell directory entry: where a payload lives and how it splits into key and data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CellSlot {
    /// Length of the key prefix of the payload.
    pub key_size: u32,
    /// Length of the data suffix of the payload.
    pub data_size: u32,
    /// Page offset of the first payload byte.
    pub offset: u16,
}

impl CellSlot {
    /// Total payload length, key plus data.
    pub fn payload_len(&self) -> usize {
        self.key_size as usize + self.data_size as usize
    }

    /// Offset one past the last payload byte.
    pub fn end(&self) -> usize {
        self.offset as usize + self.payload_len()
    }

    /// Offset of the first data byte.
    pub fn data_offset(&self) -> usize {
        self.offset as usize + self.key_size as usize
    }

    pub(crate) fn key<'a>(&self, page: &'a [u8]) -> &'a [u8] {
        &page[self.offset as usize..self.data_offset()]
    }

    pub(crate) fn data<'a>(&self, page: &'a [u8]) -> &'a [u8] {
        &page[self.data_offset()..self.end()]
    }

    fn read(page: &[u8], idx: usize) -> Self {
        let base = HDR_SIZE + idx * CELL_SLOT_SIZE;
        Self {
            key_size: read_u32(page, base),
            data_size: read_u32(page, base + 4),
            offset: read_u16(page, base + 8),
        }
    }

    fn write(&self, page: &mut [u8], idx: usize) {
        let base = HDR_SIZE + idx * CELL_SLOT_SIZE;
        write_u32(page, base, self.key_size);
        write_u32(page, base + 4, self.data_size);
        write_u16(page, base + 8, self.offset);
        write_u16(page, base + 10, 0);
    }
}

/// Positional access to directory entries, shared by the byte view and the decoded copy.
pub(crate) trait SlotSource {
    fn slot_count(&self) -> usize;
    fn slot_at(&self, idx: usize) -> CellSlot;
}

/// Read-only view over the directory stored in a page buffer.
#[derive(Clone, Copy)]
pub(crate) struct DirectoryView<'a> {
    page: &'a [u8],
    len: usize,
}

impl<'a> DirectoryView<'a> {
    pub(crate) fn new(page: &'a [u8], len: usize) -> Self {
        Self { page, len }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn slot(&self, idx: usize) -> CellSlot {
        CellSlot::read(self.page, idx)
    }

    pub(crate) fn slot_checked(&self, idx: usize) -> Result<CellSlot> {
        if idx >= self.len {
            return Err(SlottedError::Invalid("cell index out of range"));
        }
        let slot = self.slot(idx);
        if slot.end() > self.page.len() {
            return Err(SlottedError::Corruption("cell payload exceeds page"));
        }
        Ok(slot)
    }
}

impl SlotSource for DirectoryView<'_> {
    fn slot_count(&self) -> usize {
        self.len
    }

    fn slot_at(&self, idx: usize) -> CellSlot {
        self.slot(idx)
    }
}

/// Decoded, mutable copy of a page's cell directory.
#[derive(Clone, Debug, Default)]
pub(crate) struct CellDirectory {
    slots: SmallVec<[CellSlot; INLINE_SLOTS]>,
}

impl CellDirectory {
    pub(crate) fn decode(page: &[u8], header: &Header) -> Result<Self> {
        let meta_end = header.meta_end();
        let mut slots = SmallVec::with_capacity(header.cell_count as usize);
        for idx in 0..header.cell_count as usize {
            let slot = CellSlot::read(page, idx);
            if slot.key_size == 0 {
                return Err(SlottedError::Corruption("cell with empty key"));
            }
            if (slot.offset as usize) < meta_end || slot.end() > page.len() {
                return Err(SlottedError::Corruption("cell payload outside data region"));
            }
            slots.push(slot);
        }
        Ok(Self { slots })
    }

    pub(crate) fn encode(&self, page: &mut [u8]) {
        for (idx, slot) in self.slots.iter().enumerate() {
            slot.write(page, idx);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn get(&self, idx: usize) -> Result<CellSlot> {
        self.slots
            .get(idx)
            .copied()
            .ok_or(SlottedError::Invalid("cell index out of range"))
    }

    pub(crate) fn get_mut(&mut self, idx: usize) -> Result<&mut CellSlot> {
        self.slots
            .get_mut(idx)
            .ok_or(SlottedError::Invalid("cell index out of range"))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &CellSlot> {
        self.slots.iter()
    }

    pub(crate) fn insert(&mut self, idx: usize, slot: CellSlot) {
        self.slots.insert(idx, slot);
    }

    pub(crate) fn remove(&mut self, idx: usize) -> Result<CellSlot> {
        if idx >= self.slots.len() {
            return Err(SlottedError::Invalid("cell index out of range"));
        }
        Ok(self.slots.remove(idx))
    }
}

impl SlotSource for CellDirectory {
    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn slot_at(&self, idx: usize) -> CellSlot {
        self.slots[idx]
    }
}

/// Index of the first cell whose key is not less than `key`.
pub(crate) fn lower_bound<S: SlotSource>(
    slots: &S,
    page: &[u8],
    key: &[u8],
    cmp: &dyn KeyComparator,
) -> usize {
    partition(slots, page, |cell| cmp.compare(cell, key) == Ordering::Less)
}

/// Index of the first cell whose key is strictly greater than `key`.
pub(crate) fn upper_bound<S: SlotSource>(
    slots: &S,
    page: &[u8],
    key: &[u8],
    cmp: &dyn KeyComparator,
) -> usize {
    partition(slots, page, |cell| cmp.compare(cell, key) != Ordering::Greater)
}

/// Index of the cell whose key equals `key`.
pub(crate) fn find<S: SlotSource>(
    slots: &S,
    page: &[u8],
    key: &[u8],
    cmp: &dyn KeyComparator,
) -> Option<usize> {
    let idx = lower_bound(slots, page, key, cmp);
    if idx < slots.slot_count()
        && cmp.compare(slots.slot_at(idx).key(page), key) == Ordering::Equal
    {
        Some(idx)
    } else {
        None
    }
}

fn partition<S, F>(slots: &S, page: &[u8], mut pred: F) -> usize
where
    S: SlotSource,
    F: FnMut(&[u8]) -> bool,
{
    let mut lo = 0;
    let mut hi = slots.slot_count();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(slots.slot_at(mid).key(page)) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}
