use smallvec::SmallVec;
use tracing::trace;

use crate::storage::btree::directory::{CellSlot, DirectoryView};
use crate::storage::btree::editor::PageEditor;
use crate::storage::btree::page::{Page, CELL_SLOT_SIZE};
use crate::types::{PageId, Result, SlottedError};

/// Result of splitting a page in two.
#[derive(Debug)]
pub struct SplitOutcome {
    /// Newly built page holding the upper half of the cells.
    pub right: Page,
    /// Copy of the first key on `right`.
    pub separator: Vec<u8>,
}

impl Page {
    /// Index of the first cell that moves to the right half.
    ///
    /// Cells accumulate `CELL_SLOT_SIZE + key + data` bytes in directory order;
    /// the first cell that pushes the running total past half the data region
    /// starts the right half.
    pub fn split_point(&self) -> Result<usize> {
        let budget = self.options.data_capacity() / 2;
        let view = self.directory();
        let mut used = 0usize;
        for idx in 0..view.len() {
            used += CELL_SLOT_SIZE + view.slot(idx).payload_len();
            if used > budget {
                if idx == 0 {
                    return Err(SlottedError::Invalid("first cell alone fills half the page"));
                }
                return Ok(idx);
            }
        }
        Err(SlottedError::Invalid("page is not full enough to split"))
    }

    /// Moves the upper half of the cells into a new page with id `right_id`.
    ///
    /// Both halves come out compacted. The receiver keeps its id and the cells
    /// before the split point.
    pub fn split(&mut self, right_id: PageId) -> Result<SplitOutcome> {
        let at = self.split_point()?;
        let right = self.split_off(at, right_id)?;
        let separator = right.key_at(0)?.to_vec();
        Ok(SplitOutcome { right, separator })
    }

    /// Moves cells `at..` into a new page, which inherits the page kind and rightmost pointer.
    pub fn split_off(&mut self, at: usize, right_id: PageId) -> Result<Page> {
        let count = self.cell_count();
        if at == 0 || at >= count {
            return Err(SlottedError::Invalid("split must leave cells on both sides"));
        }
        let header = self.header()?;
        let snapshot = self.buf.clone();
        let view = DirectoryView::new(&snapshot, count);
        let slots: SmallVec<[CellSlot; 32]> = (0..count).map(|idx| view.slot(idx)).collect();

        let mut right = Page::new(right_id, self.options.clone(), header.is_leaf)?;
        right.set_rightmost(header.rightmost);
        right.pack(&snapshot, &slots[at..])?;

        self.reset(header.page_id, header.rightmost, header.is_leaf)?;
        self.pack(&snapshot, &slots[..at])?;

        trace!(
            target: "slotted::split",
            left = %header.page_id,
            right = %right_id,
            left_cells = at,
            right_cells = count - at,
            "split page"
        );
        Ok(right)
    }

    /// Appends `slots` (read from `src`) to an empty page, payloads packed against the page end.
    fn pack(&mut self, src: &[u8], slots: &[CellSlot]) -> Result<()> {
        let mut editor = PageEditor::open(&mut self.buf)?;
        for slot in slots {
            let len = slot.payload_len();
            editor.free.reserve_cell_slot()?;
            let end = editor
                .free
                .alloc_bytes(len)
                .ok_or(SlottedError::Corruption("split half does not fit in a page"))?;
            let placed = editor.write_payload(end as usize - len, slot.key(src), slot.data(src))?;
            let idx = editor.cells.len();
            editor.cells.insert(idx, placed);
        }
        editor.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::btree::compare::BinaryCollation;
    use crate::storage::PageOptions;

    fn filled(page_size: usize, count: usize) -> Result<Page> {
        let cmp = BinaryCollation;
        let mut page = Page::new(PageId(1), PageOptions::new().page_size(page_size), true)?;
        for i in 0..count {
            let key = format!("key{i:02}");
            page.set(key.as_bytes(), b"value", &cmp)?;
        }
        Ok(page)
    }

    #[test]
    fn split_moves_upper_half_and_compacts() -> Result<()> {
        let cmp = BinaryCollation;
        let mut page = filled(512, 20)?;
        page.delete(b"key03", &cmp)?;
        page.delete(b"key15", &cmp)?;
        let at = page.split_point()?;
        let SplitOutcome { right, separator } = page.split(PageId(2))?;

        assert_eq!(page.cell_count(), at);
        assert_eq!(page.cell_count() + right.cell_count(), 18);
        assert_eq!(right.id(), PageId(2));
        assert!(right.is_leaf());
        assert_eq!(separator, right.key_at(0)?.to_vec());
        for half in [&page, &right] {
            assert_eq!(half.freeblock_count(), 1);
            half.check_invariants(&cmp)?;
        }
        let last_left = page.key_at(page.cell_count() - 1)?.to_vec();
        assert!(last_left.as_slice() < separator.as_slice());
        Ok(())
    }

    #[test]
    fn split_off_rejects_empty_halves() -> Result<()> {
        let mut page = filled(512, 4)?;
        assert!(matches!(page.split_off(0, PageId(9)), Err(SlottedError::Invalid(_))));
        assert!(matches!(page.split_off(4, PageId(9)), Err(SlottedError::Invalid(_))));
        assert_eq!(page.cell_count(), 4);
        Ok(())
    }

    #[test]
    fn split_point_needs_half_a_page() -> Result<()> {
        let page = filled(512, 2)?;
        assert!(matches!(page.split_point(), Err(SlottedError::Invalid(_))));
        Ok(())
    }

    #[test]
    fn right_half_inherits_rightmost_pointer() -> Result<()> {
        let cmp = BinaryCollation;
        let mut page = Page::new(PageId(4), PageOptions::new().page_size(256), false)?;
        page.set_rightmost(PageId(40));
        for i in 0..8u32 {
            let key = format!("sep{i}");
            page.set(key.as_bytes(), &i.to_le_bytes(), &cmp)?;
        }
        let right = page.split_off(5, PageId(5))?;
        assert!(!right.is_leaf());
        assert_eq!(right.rightmost(), PageId(40));
        assert_eq!(page.rightmost(), PageId(40));
        assert_eq!(right.key_at(0)?.as_bytes(), b"sep5");
        Ok(())
    }
}
