use log::debug;

use crate::{database::Database, types::SimpleResult};

use super::{
    page::BTreePage,
    page_cache::{PageCache, PageStore},
    table::ColumnarTable,
};

/// The in-memory side of a multi-page structural change.
///
/// New page images are built here in private memory, with their blocks
/// already allocated; `apply` then makes the whole change visible at
/// once. New pages are installed before the original page (which the
/// caller holds exclusively locked) is rewritten, so a concurrent
/// reader either sees the old single page or the finished chain via
/// its right-links; it can never observe a half-linked state.
pub struct SplitStack<P: BTreePage> {
    new_pages: Vec<P>,
}

impl<P: BTreePage> SplitStack<P> {
    pub fn new() -> Self {
        Self {
            new_pages: Vec::new(),
        }
    }

    pub fn add_new_page(&mut self, page: P) {
        self.new_pages.push(page);
    }

    pub fn len(&self) -> usize {
        self.new_pages.len()
    }

    /// Publish the stack: write and install every new page, then flush
    /// the rewritten original. `orig` is the caller's exclusive lock on
    /// the page that anchored the split, already updated in place.
    ///
    /// Nothing in here allocates or fails for lack of space; the blocks
    /// were extended when they were handed out.
    pub fn apply(self, table: &ColumnarTable, orig: &mut P) -> SimpleResult
    where
        PageCache: PageStore<P>,
    {
        let count = self.new_pages.len();

        for page in self.new_pages {
            table.flush_page(&page)?;
            Database::page_cache().install_page(page);
        }

        table.flush_page(&*orig)?;

        debug!(
            "split stack applied at {}: {} new pages",
            orig.get_pid(),
            count
        );
        Ok(())
    }
}
