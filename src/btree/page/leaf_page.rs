use std::ops::{Deref, DerefMut};

use crate::{
    btree::page_cache::PageCache,
    io::{ByteWriter, Decodeable},
    tid::Tid,
    types::EngineResult,
};

use super::{
    decode_items, split_body_opaque, ArrayItem, BTreeBasePage, BTreePage, BTreePageID,
    OPAQUE_SIZE, PAGE_ID_BTREE,
};

/// A level-0 page of one tree: an ordered array of non-overlapping
/// items over `[lokey, hikey)`.
///
/// Free space is tracked in serialized bytes; the item array header is
/// a 2-byte count.
pub struct BTreeLeafPage<I: ArrayItem> {
    base: BTreeBasePage,
    items: Vec<I>,
}

const ITEM_COUNT_HEADER: usize = 2;

impl<I: ArrayItem> Deref for BTreeLeafPage<I> {
    type Target = BTreeBasePage;
    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl<I: ArrayItem> DerefMut for BTreeLeafPage<I> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

impl<I: ArrayItem> BTreeLeafPage<I> {
    pub fn new_empty(pid: &BTreePageID, attno: u32, lokey: Tid, hikey: Tid) -> Self {
        Self {
            base: BTreeBasePage::new(pid, attno, 0, lokey, hikey),
            items: Vec::new(),
        }
    }

    /// Usable bytes on a leaf under the current page size.
    pub fn capacity() -> usize {
        PageCache::get_page_size() - OPAQUE_SIZE
    }

    pub fn used_space(&self) -> usize {
        ITEM_COUNT_HEADER + self.items.iter().map(|i| i.disk_size()).sum::<usize>()
    }

    pub fn free_space(&self) -> usize {
        Self::capacity().saturating_sub(self.used_space())
    }

    pub fn fits(&self, extra_bytes: usize) -> bool {
        self.used_space() + extra_bytes <= Self::capacity()
    }

    pub fn items(&self) -> &[I] {
        &self.items
    }

    pub fn items_count(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get_item(&self, index: usize) -> &I {
        &self.items[index]
    }

    /// Replace the whole item array. The caller guarantees order and
    /// fit; order is cheap to check, so it is.
    pub fn set_items(&mut self, items: Vec<I>) {
        debug_assert!(items_sorted(&items));
        self.items = items;
    }

    pub fn take_items(&mut self) -> Vec<I> {
        std::mem::replace(&mut self.items, Vec::new())
    }

    pub fn clone_items(&self) -> Vec<I> {
        self.items.clone()
    }

    /// Append an item known to sort after everything on the page.
    pub fn append_item(&mut self, item: I) {
        debug_assert!(self
            .items
            .last()
            .map(|l| l.end_tid() <= item.first_tid())
            .unwrap_or(true));
        self.items.push(item);
    }

    pub fn replace_item(&mut self, index: usize, item: I) {
        self.items[index] = item;
    }

    /// Splice `replacement` over `items[index]`, shifting neighbours.
    pub fn splice_item(&mut self, index: usize, replacement: Vec<I>) {
        self.items.splice(index..index + 1, replacement).for_each(drop);
        debug_assert!(items_sorted(&self.items));
    }

    /// Index of the last item with `first_tid <= tid`, which is the
    /// only item that could cover `tid`.
    pub fn find_candidate(&self, tid: Tid) -> Option<usize> {
        let mut lo = 0usize;
        let mut hi = self.items.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.items[mid].first_tid() <= tid {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo.checked_sub(1)
    }

    /// Index of the item whose range contains `tid`, if any.
    pub fn find_covering(&self, tid: Tid) -> Option<usize> {
        let idx = self.find_candidate(tid)?;
        if self.items[idx].end_tid() > tid {
            Some(idx)
        } else {
            None
        }
    }

    /// Index of the first item with `end_tid > tid`: where a scan for
    /// `tid` starts reading.
    pub fn first_item_from(&self, tid: Tid) -> usize {
        match self.find_candidate(tid) {
            None => 0,
            Some(idx) => {
                if self.items[idx].end_tid() > tid {
                    idx
                } else {
                    idx + 1
                }
            }
        }
    }
}

fn items_sorted<I: ArrayItem>(items: &[I]) -> bool {
    items
        .windows(2)
        .all(|w| w[0].end_tid() <= w[1].first_tid() && w[0].first_tid() < w[0].end_tid())
}

impl<I: ArrayItem> BTreePage for BTreeLeafPage<I> {
    fn from_bytes(pid: &BTreePageID, bytes: &[u8]) -> EngineResult<Self> {
        let (body, opaque) = split_body_opaque(bytes)?;
        let base = BTreeBasePage::decode_opaque(pid, opaque, PAGE_ID_BTREE)?;

        let mut reader = body;
        let count = u16::decode_from(&mut reader) as usize;
        let items = decode_items(&mut reader, count)?;

        Ok(Self { base, items })
    }

    fn get_pid(&self) -> BTreePageID {
        self.base.get_pid()
    }

    fn get_page_data(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write(&(self.items.len() as u16));
        for item in &self.items {
            w.write(item);
        }

        let page_size = PageCache::get_page_size();
        let mut data = w.to_padded_bytes(page_size - OPAQUE_SIZE);
        data.extend_from_slice(&self.base.encode_opaque(PAGE_ID_BTREE));
        data
    }
}
