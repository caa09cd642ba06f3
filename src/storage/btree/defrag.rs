use smallvec::SmallVec;
use tracing::trace;

use crate::storage::btree::directory::SlotSource;
use crate::storage::btree::editor::PageEditor;
use crate::types::{Result, SlottedError};

const INLINE_RANGES: usize = 32;

impl PageEditor<'_> {
    /// Slides every live payload towards the page end so all free bytes form one anchor block.
    ///
    /// When `vacating` names a cell, its payload is treated as free and its
    /// directory entry is left stale for the caller to rewrite.
    pub(crate) fn defragment(&mut self, vacating: Option<usize>) -> Result<()> {
        let page_len = self.page.len();
        let before = self.free.total();
        let blocks = self.free.len();

        let mut ranges: SmallVec<[(usize, usize); INLINE_RANGES]> = self
            .free
            .iter()
            .map(|block| (block.start as usize, block.end as usize))
            .collect();
        if let Some(idx) = vacating {
            let slot = self.cells.get(idx)?;
            ranges.push((slot.offset as usize, slot.end()));
        }
        // The anchor sorts first even when it is empty and touches the vacated payload.
        ranges.sort_unstable();

        let mut order: SmallVec<[usize; INLINE_RANGES]> = (0..self.cells.slot_count())
            .filter(|idx| Some(*idx) != vacating)
            .collect();
        order.sort_unstable_by_key(|idx| self.cells.slot_at(*idx).offset);

        let mut shift = 0usize;
        let mut upper = page_len;
        let mut pending = order.len();
        for &(start, end) in ranges.iter().rev() {
            if shift > 0 && end < upper {
                self.page.copy_within(end..upper, end + shift);
            }
            while pending > 0 {
                let slot = self.cells.get_mut(order[pending - 1])?;
                if (slot.offset as usize) < end {
                    break;
                }
                slot.offset += shift as u16;
                pending -= 1;
            }
            shift += end - start;
            upper = start;
        }
        if pending != 0 {
            return Err(SlottedError::Corruption("payload below the anchor block"));
        }

        let live: usize = order
            .iter()
            .map(|idx| self.cells.slot_at(*idx).payload_len())
            .sum();
        let anchor_start = self.header.directory_end();
        let anchor_end = page_len - live;
        self.free.collapse(anchor_start, anchor_end)?;
        self.page[anchor_start..anchor_end].fill(0);

        trace!(
            target: "slotted::defrag",
            blocks,
            before,
            after = self.free.total(),
            vacated = vacating.is_some(),
            "defragmented page"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::btree::compare::BinaryCollation;
    use crate::storage::btree::page::{Page, CELL_SLOT_SIZE, HDR_SIZE};
    use crate::storage::PageOptions;
    use crate::types::{PageId, Result};

    fn page() -> Result<Page> {
        Page::new(PageId(1), PageOptions::new().page_size(256), true)
    }

    #[test]
    fn defragment_leaves_single_anchor_and_keeps_cells() -> Result<()> {
        let cmp = BinaryCollation;
        let mut page = page()?;
        let cells: [(&[u8], &[u8]); 4] = [(b"a", b"1111"), (b"b", b"22"), (b"c", b"333333"), (b"d", b"4")];
        for (key, data) in cells {
            page.set(key, data, &cmp)?;
        }
        page.delete(b"a", &cmp)?;
        page.delete(b"c", &cmp)?;
        assert_eq!(page.freeblock_count(), 3);
        let estimate = page.estimate_freespace_after_defrag();

        page.defragment()?;

        assert_eq!(page.freeblock_count(), 1);
        assert_eq!(page.freespace(), estimate);
        let blocks = page.free_blocks()?;
        assert_eq!(blocks[0].start as usize, HDR_SIZE + 2 * CELL_SLOT_SIZE);
        assert_eq!(blocks[0].end as usize, 256 - (3 + 2));
        assert_eq!(page.get(b"b", &cmp)?.as_deref(), Some(&b"22"[..]));
        assert_eq!(page.get(b"d", &cmp)?.as_deref(), Some(&b"4"[..]));
        page.check_invariants(&cmp)?;
        Ok(())
    }

    #[test]
    fn defragmenting_compact_page_changes_nothing() -> Result<()> {
        let cmp = BinaryCollation;
        let mut page = page()?;
        page.set(b"k1", b"v1", &cmp)?;
        page.set(b"k2", b"v2", &cmp)?;
        let before = page.as_bytes().to_vec();
        page.defragment()?;
        assert_eq!(page.as_bytes(), &before[..]);
        Ok(())
    }
}
