//! In-memory page table handing out page ids and owning page buffers.

use std::collections::HashMap;

use tracing::debug;

use crate::storage::btree::page::Page;
use crate::storage::PageOptions;
use crate::types::{PageId, Result, SlottedError};

/// Monotonic page id source. Id 0 is reserved to mean "no page".
#[derive(Clone, Debug)]
pub struct PageIdAllocator {
    next: u32,
}

impl Default for PageIdAllocator {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl PageIdAllocator {
    /// Hands out the next unused id.
    pub fn next_id(&mut self) -> PageId {
        let id = PageId(self.next);
        self.next += 1;
        id
    }
}

/// Owns every page of one tree, keyed by id.
#[derive(Debug)]
pub struct MemPager {
    options: PageOptions,
    ids: PageIdAllocator,
    pages: HashMap<PageId, Page>,
}

impl MemPager {
    /// Creates an empty pager whose pages all use `options`.
    pub fn new(options: PageOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            ids: PageIdAllocator::default(),
            pages: HashMap::new(),
        })
    }

    /// Options shared by every page.
    pub fn options(&self) -> &PageOptions {
        &self.options
    }

    /// Number of live pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Whether the pager holds no pages.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Ids of every stored page, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = PageId> + '_ {
        self.pages.keys().copied()
    }

    /// Reserves an id without creating a page for it.
    pub fn allocate_id(&mut self) -> PageId {
        self.ids.next_id()
    }

    /// Creates and stores an empty page.
    pub fn allocate(&mut self, is_leaf: bool) -> Result<PageId> {
        let id = self.ids.next_id();
        let page = Page::new(id, self.options.clone(), is_leaf)?;
        self.pages.insert(id, page);
        debug!(target: "slotted::pager", page = %id, is_leaf, "allocated page");
        Ok(id)
    }

    /// Stores a page built elsewhere, such as the right half of a split.
    pub fn insert(&mut self, page: Page) -> Result<()> {
        if page.options().page_size != self.options.page_size {
            return Err(SlottedError::Invalid("page size differs from pager"));
        }
        let id = page.id();
        if self.pages.contains_key(&id) {
            return Err(SlottedError::Invalid("page id already in use"));
        }
        self.pages.insert(id, page);
        Ok(())
    }

    /// Borrows page `id`.
    pub fn get(&self, id: PageId) -> Result<&Page> {
        self.pages.get(&id).ok_or(SlottedError::PageNotFound(id))
    }

    /// Mutably borrows page `id`.
    pub fn get_mut(&mut self, id: PageId) -> Result<&mut Page> {
        self.pages.get_mut(&id).ok_or(SlottedError::PageNotFound(id))
    }

    /// Removes page `id` and returns it.
    pub fn destroy(&mut self, id: PageId) -> Result<Page> {
        let page = self.pages.remove(&id).ok_or(SlottedError::PageNotFound(id))?;
        debug!(target: "slotted::pager", page = %id, "destroyed page");
        Ok(page)
    }
}
