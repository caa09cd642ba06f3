use std::convert::TryFrom;

use tracing::trace;

use crate::storage::btree::compare::KeyComparator;
use crate::storage::btree::directory::{self, CellDirectory, CellSlot};
use crate::storage::btree::freeblock::FreeBlockList;
use crate::storage::btree::page::{Header, Page, CELL_SLOT_SIZE};
use crate::types::{Result, SlottedError};

/// How a successful [`Page::set`] placed the payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetKind {
    /// A new cell was added.
    Inserted,
    /// An existing cell was rewritten without moving its end offset.
    UpdatedInPlace,
    /// An existing cell was moved to a different byte range.
    Relocated,
}

/// Result of a successful [`Page::set`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetOutcome {
    /// Where the payload went.
    pub kind: SetKind,
    /// Whether the page was defragmented to make room.
    pub defragmented: bool,
}

impl SetOutcome {
    fn new(kind: SetKind, defragmented: bool) -> Self {
        Self { kind, defragmented }
    }
}

impl Page {
    /// Inserts `key` with `data`, or overwrites the data already stored under `key`.
    ///
    /// On any error the page bytes are left exactly as they were.
    pub fn set(&mut self, key: &[u8], data: &[u8], cmp: &dyn KeyComparator) -> Result<SetOutcome> {
        let size = key.len() + data.len();
        let limit = self.options.max_payload();
        if size > limit {
            return Err(SlottedError::PayloadTooBig { size, limit });
        }
        if key.is_empty() {
            return Err(SlottedError::Invalid("keys must not be empty"));
        }
        let retry_fragmented = self.options.defrag_on_fragmentation;
        let mut editor = PageEditor::open(&mut self.buf)?;
        let outcome = match directory::find(&editor.cells, editor.page, key, cmp) {
            Some(idx) => editor.overwrite(idx, key, data)?,
            None => editor.insert(key, data, cmp, retry_fragmented)?,
        };
        editor.persist()?;
        Ok(outcome)
    }

    /// Removes `key` and its data. Returns `false` when the key is absent.
    pub fn delete(&mut self, key: &[u8], cmp: &dyn KeyComparator) -> Result<bool> {
        let mut editor = PageEditor::open(&mut self.buf)?;
        let Some(idx) = directory::find(&editor.cells, editor.page, key, cmp) else {
            return Ok(false);
        };
        editor.remove(idx)?;
        editor.persist()?;
        Ok(true)
    }

    /// Coalesces every free byte into the anchor block.
    pub fn defragment(&mut self) -> Result<()> {
        let mut editor = PageEditor::open(&mut self.buf)?;
        editor.defragment(None)?;
        editor.persist()
    }
}

/// Decoded page metadata plus the page bytes it describes.
///
/// Operations mutate the decoded copies first; payload bytes are only written
/// once the bookkeeping has succeeded, and [`PageEditor::persist`] writes the
/// metadata back. Defragmentation moves payload bytes immediately, so it only
/// runs once the operation is certain to succeed.
pub(crate) struct PageEditor<'page> {
    pub(crate) page: &'page mut [u8],
    pub(crate) header: Header,
    pub(crate) cells: CellDirectory,
    pub(crate) free: FreeBlockList,
}

impl<'page> PageEditor<'page> {
    pub(crate) fn open(page: &'page mut [u8]) -> Result<Self> {
        let header = Header::parse(page)?;
        let cells = CellDirectory::decode(page, &header)?;
        let free = FreeBlockList::decode(page, &header)?;
        Ok(Self {
            page,
            header,
            cells,
            free,
        })
    }

    pub(crate) fn persist(&mut self) -> Result<()> {
        self.header.cell_count = u16::try_from(self.cells.len())
            .map_err(|_| SlottedError::Corruption("cell count exceeds u16"))?;
        self.header.freeblock_count = u16::try_from(self.free.len())
            .map_err(|_| SlottedError::Corruption("free-block count exceeds u16"))?;
        self.header.freespace = u16::try_from(self.free.total())
            .map_err(|_| SlottedError::Corruption("freespace exceeds u16"))?;
        if self.free.anchor().start as usize != self.header.meta_end() {
            return Err(SlottedError::Corruption("anchor detached from page metadata"));
        }
        self.header.write(self.page);
        self.cells.encode(self.page);
        self.free.encode(self.page, self.header.directory_end());
        Ok(())
    }

    fn insert(
        &mut self,
        key: &[u8],
        data: &[u8],
        cmp: &dyn KeyComparator,
        retry_fragmented: bool,
    ) -> Result<SetOutcome> {
        let payload_len = key.len() + data.len();
        let required = payload_len + CELL_SLOT_SIZE;
        let mut defragmented = false;
        if self.free.total() < required {
            if self.free.estimate_after_defrag() < required {
                trace!(
                    target: "slotted::page",
                    required,
                    estimate = self.free.estimate_after_defrag(),
                    "insert does not fit"
                );
                return Err(SlottedError::NotEnoughSpace);
            }
            self.defragment(None)?;
            defragmented = true;
        }
        let offset = match self.reserve_cell(payload_len) {
            Ok(offset) => offset,
            Err(SlottedError::FreeBlockNotFound) if defragmented => return Err(post_defrag_failure()),
            Err(SlottedError::FreeBlockNotFound) if retry_fragmented => {
                self.defragment(None)?;
                defragmented = true;
                self.reserve_cell(payload_len)
                    .map_err(|_| post_defrag_failure())?
            }
            Err(err) => return Err(err),
        };
        let idx = directory::lower_bound(&self.cells, self.page, key, cmp);
        let slot = self.write_payload(offset, key, data)?;
        self.cells.insert(idx, slot);
        Ok(SetOutcome::new(SetKind::Inserted, defragmented))
    }

    /// Reserves a directory slot and payload bytes, rolling back both on failure.
    fn reserve_cell(&mut self, payload_len: usize) -> Result<usize> {
        let checkpoint = self.free.clone();
        self.free.reserve_cell_slot()?;
        match self.free.alloc_bytes(payload_len) {
            Some(end) => Ok(end as usize - payload_len),
            None => {
                self.free = checkpoint;
                Err(SlottedError::FreeBlockNotFound)
            }
        }
    }

    fn overwrite(&mut self, idx: usize, key: &[u8], data: &[u8]) -> Result<SetOutcome> {
        let old = self.cells.get(idx)?;
        let old_len = old.payload_len();
        let new_len = key.len() + data.len();
        let checkpoint = self.free.clone();
        if new_len <= old_len {
            let diff = old_len - new_len;
            if diff > 0 {
                match self
                    .free
                    .dealloc_bytes(old.offset as usize, old.offset as usize + diff)
                {
                    Ok(()) => {}
                    Err(err) if err.is_retryable() => {
                        self.free = checkpoint;
                        return self.relocate_after_defrag(idx, key, data);
                    }
                    Err(err) => return Err(err),
                }
            }
            let slot = self.write_payload(old.offset as usize + diff, key, data)?;
            *self.cells.get_mut(idx)? = slot;
            return Ok(SetOutcome::new(SetKind::UpdatedInPlace, false));
        }

        let moved = self
            .free
            .dealloc_bytes(old.offset as usize, old.end())
            .and_then(|()| self.free.alloc_bytes(new_len).ok_or(SlottedError::NotEnoughSpace));
        match moved {
            Ok(end) => {
                let slot = self.write_payload(end as usize - new_len, key, data)?;
                *self.cells.get_mut(idx)? = slot;
                Ok(SetOutcome::new(SetKind::Relocated, false))
            }
            Err(err) if err.is_retryable() => {
                self.free = checkpoint;
                self.relocate_after_defrag(idx, key, data)
            }
            Err(err) => Err(err),
        }
    }

    /// Defragments with the payload of cell `idx` treated as free, then places the new payload.
    fn relocate_after_defrag(&mut self, idx: usize, key: &[u8], data: &[u8]) -> Result<SetOutcome> {
        let old = self.cells.get(idx)?;
        let new_len = key.len() + data.len();
        let estimate = self.free.estimate_after_defrag() + old.payload_len();
        if estimate < new_len {
            trace!(
                target: "slotted::page",
                new_len,
                estimate,
                "overwrite does not fit"
            );
            return Err(SlottedError::NotEnoughSpace);
        }
        self.defragment(Some(idx))?;
        let end = self
            .free
            .alloc_bytes(new_len)
            .ok_or_else(post_defrag_failure)?;
        let slot = self.write_payload(end as usize - new_len, key, data)?;
        *self.cells.get_mut(idx)? = slot;
        Ok(SetOutcome::new(SetKind::Relocated, true))
    }

    fn remove(&mut self, idx: usize) -> Result<()> {
        let slot = self.cells.remove(idx)?;
        // The released slot gives the anchor room for a new descriptor.
        self.free.release_cell_slot();
        self.free.dealloc_bytes(slot.offset as usize, slot.end())
    }

    pub(crate) fn write_payload(&mut self, offset: usize, key: &[u8], data: &[u8]) -> Result<CellSlot> {
        let slot = CellSlot {
            key_size: u32::try_from(key.len())
                .map_err(|_| SlottedError::Invalid("key longer than u32"))?,
            data_size: u32::try_from(data.len())
                .map_err(|_| SlottedError::Invalid("data longer than u32"))?,
            offset: u16::try_from(offset)
                .map_err(|_| SlottedError::Corruption("payload offset exceeds u16"))?,
        };
        let data_at = slot.data_offset();
        self.page[offset..data_at].copy_from_slice(key);
        self.page[data_at..slot.end()].copy_from_slice(data);
        Ok(slot)
    }
}

fn post_defrag_failure() -> SlottedError {
    debug_assert!(false, "allocation failed after defragmentation");
    SlottedError::Corruption("allocation failed after defragmentation")
}
