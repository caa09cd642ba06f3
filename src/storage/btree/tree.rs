use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::trace;

use crate::primitives::pager::MemPager;
use crate::storage::btree::compare::{BinaryCollation, KeyComparator};
use crate::storage::btree::editor::SetOutcome;
use crate::storage::btree::page::Page;
use crate::storage::btree::split::SplitOutcome;
use crate::storage::btree::stats::{BTreeStats, BTreeStatsSnapshot, SplitKind};
use crate::storage::PageOptions;
use crate::types::{PageId, Result, SlottedError};

type SearchPath = SmallVec<[PageId; 8]>;

/// Width of the child page id stored as an internal cell's data.
const CHILD_POINTER_SIZE: usize = 4;

/// A B-tree of slotted pages held in a [`MemPager`].
///
/// Internal cells map a separator key to the child holding keys below it;
/// the page's rightmost pointer holds keys at or above the last separator.
/// Deletes never merge or rebalance pages.
pub struct BTree<C: KeyComparator = BinaryCollation> {
    pager: MemPager,
    root: PageId,
    cmp: C,
    stats: Arc<BTreeStats>,
}

impl<C: KeyComparator> BTree<C> {
    /// Creates a tree consisting of a single empty leaf.
    pub fn new(options: PageOptions, cmp: C) -> Result<Self> {
        let mut pager = MemPager::new(options)?;
        let root = pager.allocate(true)?;
        Ok(Self {
            pager,
            root,
            cmp,
            stats: Arc::default(),
        })
    }

    /// Returns the root page id.
    pub fn root_page(&self) -> PageId {
        self.root
    }

    /// Read access to the underlying pages.
    pub fn pager(&self) -> &MemPager {
        &self.pager
    }

    /// Returns a handle to the tree's statistics.
    pub fn stats(&self) -> Arc<BTreeStats> {
        Arc::clone(&self.stats)
    }

    /// Returns a point-in-time copy of the statistics.
    pub fn stats_snapshot(&self) -> BTreeStatsSnapshot {
        self.stats.snapshot()
    }

    /// Emits the current statistics through `tracing`.
    pub fn emit_stats(&self) {
        self.stats.emit_tracing();
    }

    /// Looks up `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<&[u8]>> {
        let path = self.search_path(key)?;
        let leaf = self.pager.get(leaf_of(&path)?)?;
        Ok(leaf.get(key, &self.cmp)?.map(|value| value.as_bytes()))
    }

    /// Inserts or overwrites `key`, splitting pages on the way up as needed.
    ///
    /// Keys must leave room for a child pointer beside them, since any key may
    /// be promoted into an internal page.
    pub fn put(&mut self, key: &[u8], val: &[u8]) -> Result<()> {
        let limit = self.pager.options().max_payload();
        if key.len() + CHILD_POINTER_SIZE > limit {
            return Err(SlottedError::PayloadTooBig {
                size: key.len() + CHILD_POINTER_SIZE,
                limit,
            });
        }
        loop {
            let path = self.search_path(key)?;
            let leaf_id = leaf_of(&path)?;
            match self.set_compacting(leaf_id, key, val) {
                Ok(outcome) => {
                    self.stats.record_set(outcome);
                    return Ok(());
                }
                Err(err) if err.is_retryable() => {}
                Err(err) => return Err(err),
            }
            // Each split shrinks the target leaf, so the retry eventually fits.
            self.split_leaf(&path)?;
        }
    }

    /// Removes `key` from its leaf. Returns `false` when the key is absent.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        let path = self.search_path(key)?;
        let removed = self.pager.get_mut(leaf_of(&path)?)?.delete(key, &self.cmp)?;
        if removed {
            self.stats.record_delete();
        }
        Ok(removed)
    }

    /// Every key/value pair in key order.
    pub fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        self.collect(self.root, 0, &mut out)?;
        Ok(out)
    }

    /// Number of page levels from the root down to the leaves.
    pub fn height(&self) -> Result<usize> {
        let mut height = 1;
        let mut current = self.pager.get(self.root)?;
        while !current.is_leaf() {
            let child = match current.cells().next() {
                Some((_, child)) => decode_child(child)?,
                None => current.rightmost(),
            };
            current = self.pager.get(child)?;
            height += 1;
            if height > self.pager.len() {
                return Err(SlottedError::Corruption("tree contains a cycle"));
            }
        }
        Ok(height)
    }

    /// Verifies every page, the links between them, and the global key order.
    ///
    /// Each pager page must be reachable from the root exactly once, all
    /// leaves must sit at the same depth, and every key must lie within the
    /// separator bounds its parents route it by.
    pub fn check_invariants(&self) -> Result<()> {
        let mut walk = CheckWalk::default();
        self.check_page(self.root, 0, None, None, &mut walk)?;
        if self.pager.ids().any(|id| !walk.visited.contains(&id)) {
            return Err(SlottedError::Corruption("page unreachable from root"));
        }
        let entries = self.entries()?;
        for pair in entries.windows(2) {
            if self.cmp.compare(&pair[0].0, &pair[1].0) != Ordering::Less {
                return Err(SlottedError::Corruption("leaves out of key order"));
            }
        }
        Ok(())
    }

    fn search_path(&self, key: &[u8]) -> Result<SearchPath> {
        let mut path = SearchPath::new();
        let mut current = self.root;
        loop {
            path.push(current);
            let page = self.pager.get(current)?;
            if page.is_leaf() {
                self.stats.record_search(true);
                return Ok(path);
            }
            self.stats.record_search(false);
            if path.len() > self.pager.len() {
                return Err(SlottedError::Corruption("tree contains a cycle"));
            }
            current = child_for(page, key, &self.cmp)?;
        }
    }

    fn split_leaf(&mut self, path: &[PageId]) -> Result<()> {
        let (&leaf_id, ancestors) = path
            .split_last()
            .ok_or(SlottedError::Corruption("empty search path"))?;
        let right_id = self.pager.allocate_id();
        let SplitOutcome { right, separator } = self.pager.get_mut(leaf_id)?.split(right_id)?;
        self.pager.insert(right)?;
        self.stats.record_split(SplitKind::Leaf);
        trace!(
            target: "slotted::tree",
            left = %leaf_id,
            right = %right_id,
            "split leaf"
        );
        self.promote(ancestors, leaf_id, right_id, separator)
    }

    /// Installs `separator` for the split of `left` into `left` and `right`,
    /// splitting ancestors as long as they overflow.
    fn promote(
        &mut self,
        ancestors: &[PageId],
        mut left: PageId,
        mut right: PageId,
        mut separator: Vec<u8>,
    ) -> Result<()> {
        for &parent_id in ancestors.iter().rev() {
            redirect_child(self.pager.get_mut(parent_id)?, left, right, &self.cmp)?;
            let child = left.0.to_le_bytes();
            match self.set_compacting(parent_id, &separator, &child) {
                Ok(_) => return Ok(()),
                Err(err) if err.is_retryable() => {}
                Err(err) => return Err(err),
            }
            let (sibling, promoted) = self.split_internal(parent_id)?;
            let target = if self.cmp.compare(&separator, &promoted) == Ordering::Less {
                parent_id
            } else {
                sibling
            };
            self.set_compacting(target, &separator, &child)?;
            left = parent_id;
            right = sibling;
            separator = promoted;
        }

        let root_id = self.pager.allocate(false)?;
        let root = self.pager.get_mut(root_id)?;
        root.set(&separator, &left.0.to_le_bytes(), &self.cmp)?;
        root.set_rightmost(right);
        self.root = root_id;
        self.stats.record_split(SplitKind::Root);
        trace!(target: "slotted::tree", root = %root_id, "grew new root");
        Ok(())
    }

    /// Sets `key` on page `id`, compacting the page once if its free bytes are scattered.
    fn set_compacting(&mut self, id: PageId, key: &[u8], val: &[u8]) -> Result<SetOutcome> {
        let page = self.pager.get_mut(id)?;
        match page.set(key, val, &self.cmp) {
            Err(SlottedError::FreeBlockNotFound) => {
                page.defragment()?;
                self.stats.record_defragmentation();
                page.set(key, val, &self.cmp)
            }
            other => other,
        }
    }

    /// Splits an internal page and returns the new sibling plus the key pushed up.
    ///
    /// The first cell of the upper half moves to the parent; its child becomes
    /// the lower half's rightmost pointer. A two-cell page leaves the sibling
    /// with only its rightmost pointer.
    fn split_internal(&mut self, page_id: PageId) -> Result<(PageId, Vec<u8>)> {
        let sibling = self.pager.allocate_id();
        let page = self.pager.get_mut(page_id)?;
        let count = page.cell_count();
        if count < 2 {
            return Err(SlottedError::Corruption("internal page too small to split"));
        }
        let at = match page.split_point() {
            Ok(at) if count > 2 => at.clamp(1, count - 2),
            Ok(_) => 1,
            Err(_) => count / 2,
        };
        let promoted = page.key_at(at)?.to_vec();
        let promoted_child = decode_child(page.data_at(at)?.as_bytes())?;
        let mut right = page.split_off(at, sibling)?;
        right.delete(&promoted, &self.cmp)?;
        page.set_rightmost(promoted_child);
        self.pager.insert(right)?;
        self.stats.record_split(SplitKind::Internal);
        trace!(
            target: "slotted::tree",
            left = %page_id,
            right = %sibling,
            "split internal page"
        );
        Ok((sibling, promoted))
    }

    fn collect(&self, id: PageId, depth: usize, out: &mut Vec<(Vec<u8>, Vec<u8>)>) -> Result<()> {
        if depth > self.pager.len() {
            return Err(SlottedError::Corruption("tree contains a cycle"));
        }
        let page = self.pager.get(id)?;
        if page.is_leaf() {
            out.extend(page.cells().map(|(key, val)| (key.to_vec(), val.to_vec())));
            return Ok(());
        }
        for (_, child) in page.cells() {
            self.collect(decode_child(child)?, depth + 1, out)?;
        }
        self.collect(page.rightmost(), depth + 1, out)
    }

    /// Checks page `id`, whose keys must fall in `[lower, upper)`, and everything below it.
    fn check_page<'a>(
        &'a self,
        id: PageId,
        depth: usize,
        lower: Option<&'a [u8]>,
        upper: Option<&'a [u8]>,
        walk: &mut CheckWalk,
    ) -> Result<()> {
        if !walk.visited.insert(id) {
            return Err(SlottedError::Corruption("page reachable more than once"));
        }
        let page = self.pager.get(id)?;
        page.check_invariants(&self.cmp)?;
        for (key, _) in page.cells() {
            let below = lower.map_or(false, |lo| self.cmp.compare(key, lo) == Ordering::Less);
            let above = upper.map_or(false, |hi| self.cmp.compare(key, hi) != Ordering::Less);
            if below || above {
                return Err(SlottedError::Corruption("key outside its parent's separator bounds"));
            }
        }
        if page.is_leaf() {
            return match walk.leaf_depth {
                Some(expected) if expected != depth => {
                    Err(SlottedError::Corruption("leaves at different depths"))
                }
                _ => {
                    walk.leaf_depth = Some(depth);
                    Ok(())
                }
            };
        }
        let mut low = lower;
        for (key, child) in page.cells() {
            self.check_page(decode_child(child)?, depth + 1, low, Some(key), walk)?;
            low = Some(key);
        }
        self.check_page(page.rightmost(), depth + 1, low, upper, walk)
    }
}

#[derive(Default)]
struct CheckWalk {
    visited: HashSet<PageId>,
    leaf_depth: Option<usize>,
}

fn leaf_of(path: &SearchPath) -> Result<PageId> {
    path.last()
        .copied()
        .ok_or(SlottedError::Corruption("empty search path"))
}

fn child_for(page: &Page, key: &[u8], cmp: &dyn KeyComparator) -> Result<PageId> {
    let idx = page.upper_bound(key, cmp);
    if idx == page.cell_count() {
        Ok(page.rightmost())
    } else {
        decode_child(page.data_at(idx)?.as_bytes())
    }
}

fn decode_child(bytes: &[u8]) -> Result<PageId> {
    match bytes {
        [a, b, c, d] => Ok(PageId(u32::from_le_bytes([*a, *b, *c, *d]))),
        _ => Err(SlottedError::Corruption("internal cell does not hold a page id")),
    }
}

/// Repoints whichever pointer of `parent` referenced `from` at `to`.
fn redirect_child(parent: &mut Page, from: PageId, to: PageId, cmp: &dyn KeyComparator) -> Result<()> {
    if parent.rightmost() == from {
        parent.set_rightmost(to);
        return Ok(());
    }
    for idx in 0..parent.cell_count() {
        if decode_child(parent.data_at(idx)?.as_bytes())? == from {
            let key = parent.key_at(idx)?.to_vec();
            parent.set(&key, &to.0.to_le_bytes(), cmp)?;
            return Ok(());
        }
    }
    Err(SlottedError::Corruption("parent does not reference split child"))
}
