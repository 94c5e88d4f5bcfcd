use std::ops::{Deref, DerefMut};

use crate::{
    btree::page_cache::PageCache,
    io::{ByteWriter, Decodeable, Encodeable},
    tid::Tid,
    types::EngineResult,
};

use super::{
    split_body_opaque, BTreeBasePage, BTreePage, BTreePageID, OPAQUE_SIZE, PAGE_ID_BTREE,
};

/// `(key, child_block)` entry of an internal page; `key` is the child's
/// lokey.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Downlink {
    pub key: Tid,
    pub child: u32,
}

impl Downlink {
    pub const DISK_SIZE: usize = 8 + 4;

    pub fn new(key: Tid, child: u32) -> Self {
        Self { key, child }
    }
}

impl Encodeable for Downlink {
    fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write(&self.key);
        w.write(&self.child);
        w.to_bytes()
    }
}

impl Decodeable for Downlink {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
        let key = Tid::decode_from(reader);
        let child = u32::decode_from(reader);
        Self { key, child }
    }
}

/// A level ≥ 1 page: an ordered array of downlinks. Descent picks the
/// greatest `key <= tid`, clamped to the first entry.
pub struct BTreeInternalPage {
    base: BTreeBasePage,
    entries: Vec<Downlink>,
}

const ENTRY_COUNT_HEADER: usize = 2;

impl Deref for BTreeInternalPage {
    type Target = BTreeBasePage;
    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl DerefMut for BTreeInternalPage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

impl BTreeInternalPage {
    pub fn new_empty(pid: &BTreePageID, attno: u32, level: u16, lokey: Tid, hikey: Tid) -> Self {
        Self {
            base: BTreeBasePage::new(pid, attno, level, lokey, hikey),
            entries: Vec::new(),
        }
    }

    pub fn capacity() -> usize {
        PageCache::get_page_size() - OPAQUE_SIZE
    }

    pub fn max_entries() -> usize {
        (Self::capacity() - ENTRY_COUNT_HEADER) / Downlink::DISK_SIZE
    }

    pub fn entries(&self) -> &[Downlink] {
        &self.entries
    }

    pub fn entries_count(&self) -> usize {
        self.entries.len()
    }

    pub fn set_entries(&mut self, entries: Vec<Downlink>) {
        debug_assert!(entries.windows(2).all(|w| w[0].key < w[1].key));
        self.entries = entries;
    }

    pub fn clone_entries(&self) -> Vec<Downlink> {
        self.entries.clone()
    }

    pub fn fits(&self, extra_entries: usize) -> bool {
        self.entries.len() + extra_entries <= Self::max_entries()
    }

    /// The child to descend into for `tid`.
    pub fn lookup_child(&self, tid: Tid) -> Option<Downlink> {
        if self.entries.is_empty() {
            return None;
        }

        let mut lo = 0usize;
        let mut hi = self.entries.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.entries[mid].key <= tid {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        // every key is greater than tid: clamp to the leftmost child
        let idx = lo.checked_sub(1).unwrap_or(0);
        Some(self.entries[idx])
    }

    pub fn position_of_child(&self, child: u32) -> Option<usize> {
        self.entries.iter().position(|d| d.child == child)
    }

    /// Insert downlinks, keeping the array ordered by key.
    pub fn insert_entries(&mut self, downlinks: &[Downlink]) {
        for d in downlinks {
            let pos = self
                .entries
                .iter()
                .position(|e| e.key > d.key)
                .unwrap_or(self.entries.len());
            self.entries.insert(pos, *d);
        }
        debug_assert!(self.entries.windows(2).all(|w| w[0].key < w[1].key));
    }

    pub fn remove_entry(&mut self, index: usize) -> Downlink {
        self.entries.remove(index)
    }
}

impl BTreePage for BTreeInternalPage {
    fn from_bytes(pid: &BTreePageID, bytes: &[u8]) -> EngineResult<Self> {
        let (body, opaque) = split_body_opaque(bytes)?;
        let base = BTreeBasePage::decode_opaque(pid, opaque, PAGE_ID_BTREE)?;

        let mut reader = body;
        let count = u16::decode_from(&mut reader) as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(Downlink::decode_from(&mut reader));
        }

        Ok(Self { base, entries })
    }

    fn get_pid(&self) -> BTreePageID {
        self.base.get_pid()
    }

    fn get_page_data(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write(&(self.entries.len() as u16));
        for e in &self.entries {
            w.write(e);
        }

        let page_size = PageCache::get_page_size();
        let mut data = w.to_padded_bytes(page_size - OPAQUE_SIZE);
        data.extend_from_slice(&self.base.encode_opaque(PAGE_ID_BTREE));
        data
    }
}
