pub mod internal_page;
pub mod leaf_page;
pub mod meta_page;

pub use internal_page::{BTreeInternalPage, Downlink};
pub use leaf_page::BTreeLeafPage;
pub use meta_page::{MetaPage, TreeRoot};

use core::fmt;
use std::io::Read;

use crate::{
    error::EngineError,
    io::{ByteWriter, Decodeable, Encodeable},
    tid::Tid,
    types::EngineResult,
};

/// Tail-of-page self identification byte, one value per page kind the
/// relation file can hold.
pub const PAGE_ID_META: u16 = 0xF0;
pub const PAGE_ID_BTREE: u16 = 0xF1;
pub const PAGE_ID_UNDO: u16 = 0xF2;
pub const PAGE_ID_TOAST: u16 = 0xF3;
pub const PAGE_ID_FPM: u16 = 0xF4;

/// Serialized size of the page opaque held in the last bytes of every
/// page: attno, next, lokey, hikey, level, flags, page id, reserved.
pub const OPAQUE_SIZE: usize = 4 + 4 + 8 + 8 + 2 + 2 + 2 + 2;

/// `flags` bits of the opaque.
pub const PAGE_FLAG_ROOT: u16 = 0x01;
pub const PAGE_FLAG_DELETED: u16 = 0x02;

/// `next_block` value meaning "no right sibling". Block 0 is the
/// metapage, so it can never be a sibling.
pub const NO_BLOCK: u32 = 0;

/// The attribute number of the TID tree. Attribute trees are 1-based.
pub const TID_TREE_ATTNO: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageCategory {
    Meta,
    Internal,
    TidLeaf,
    AttrLeaf,
}

impl fmt::Display for PageCategory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PageCategory::Meta => write!(f, "META"),
            PageCategory::Internal => write!(f, "INTERNAL"),
            PageCategory::TidLeaf => write!(f, "TID_LEAF"),
            PageCategory::AttrLeaf => write!(f, "ATTR_LEAF"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BTreePageID {
    pub category: PageCategory,
    pub table_id: u32,
    pub page_index: u32,
}

impl BTreePageID {
    pub fn new(category: PageCategory, table_id: u32, page_index: u32) -> Self {
        Self {
            category,
            table_id,
            page_index,
        }
    }

    /// The category a leaf of tree `attno` lives in.
    pub fn leaf_category(attno: u32) -> PageCategory {
        if attno == TID_TREE_ATTNO {
            PageCategory::TidLeaf
        } else {
            PageCategory::AttrLeaf
        }
    }

    pub fn get_short_repr(&self) -> String {
        format!("{}_{}", self.category, self.page_index)
    }
}

impl fmt::Display for BTreePageID {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<pid, category: {}, table: {}, index: {}>",
            self.category, self.table_id, self.page_index
        )
    }
}

impl fmt::Debug for BTreePageID {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// The opaque fields shared by every B-tree page, kept inline in the
/// in-memory page structs and written to the page tail on disk.
pub struct BTreeBasePage {
    pid: BTreePageID,

    pub attno: u32,
    pub level: u16,
    flags: u16,

    /// Keyspace this page covers: `[lokey, hikey)`. The rightmost page
    /// of a level has `hikey == Tid::MAX_PLUS_ONE`.
    pub lokey: Tid,
    pub hikey: Tid,

    right_sibling: u32,
}

impl BTreeBasePage {
    pub fn new(pid: &BTreePageID, attno: u32, level: u16, lokey: Tid, hikey: Tid) -> Self {
        Self {
            pid: *pid,
            attno,
            level,
            flags: 0,
            lokey,
            hikey,
            right_sibling: NO_BLOCK,
        }
    }

    pub fn get_pid(&self) -> BTreePageID {
        self.pid
    }

    pub fn set_pid(&mut self, pid: &BTreePageID) {
        self.pid = *pid;
    }

    pub fn covers(&self, tid: Tid) -> bool {
        self.lokey <= tid && tid < self.hikey
    }

    pub fn is_rightmost(&self) -> bool {
        self.hikey == Tid::MAX_PLUS_ONE
    }

    pub fn get_right_sibling(&self) -> Option<u32> {
        if self.right_sibling == NO_BLOCK {
            None
        } else {
            Some(self.right_sibling)
        }
    }

    pub fn set_right_sibling(&mut self, block: Option<u32>) {
        self.right_sibling = block.unwrap_or(NO_BLOCK);
    }

    pub fn is_root(&self) -> bool {
        self.flags & PAGE_FLAG_ROOT != 0
    }

    pub fn set_root(&mut self, root: bool) {
        if root {
            self.flags |= PAGE_FLAG_ROOT;
        } else {
            self.flags &= !PAGE_FLAG_ROOT;
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.flags & PAGE_FLAG_DELETED != 0
    }

    pub fn set_deleted(&mut self) {
        self.flags |= PAGE_FLAG_DELETED;
    }

    pub fn encode_opaque(&self, page_id: u16) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write(&self.attno);
        w.write(&self.right_sibling);
        w.write(&self.lokey);
        w.write(&self.hikey);
        w.write(&self.level);
        w.write(&self.flags);
        w.write(&page_id);
        w.write(&0u16);
        w.to_bytes()
    }

    /// Rebuild from an opaque slice taken off a page tail.
    pub fn decode_opaque(
        pid: &BTreePageID,
        opaque: &[u8],
        expect_page_id: u16,
    ) -> EngineResult<Self> {
        let mut r = opaque;
        let attno = u32::decode_from(&mut r);
        let right_sibling = u32::decode_from(&mut r);
        let lokey = Tid::decode_from(&mut r);
        let hikey = Tid::decode_from(&mut r);
        let level = u16::decode_from(&mut r);
        let flags = u16::decode_from(&mut r);
        let page_id = u16::decode_from(&mut r);

        if page_id != expect_page_id {
            return Err(EngineError::corrupt(
                attno,
                lokey.raw(),
                pid.page_index,
                &format!("unexpected page id {:#x}", page_id),
            ));
        }

        Ok(Self {
            pid: *pid,
            attno,
            level,
            flags,
            lokey,
            hikey,
            right_sibling,
        })
    }
}

/// A value stored in a leaf's ordered item array: a dense TID run in
/// the TID tree, a packed value array in an attribute tree.
pub trait ArrayItem: Encodeable + Decodeable + Clone {
    /// First tid the item covers.
    fn first_tid(&self) -> Tid;

    /// One past the last tid the item covers.
    fn end_tid(&self) -> Tid;

    /// Bytes the item occupies on a page.
    fn disk_size(&self) -> usize;
}

/// Every page kind the cache can hold: constructible from a disk image
/// and able to produce one.
pub trait BTreePage {
    fn from_bytes(pid: &BTreePageID, bytes: &[u8]) -> EngineResult<Self>
    where
        Self: Sized;

    fn get_pid(&self) -> BTreePageID;

    /// The page image, exactly one page-size worth of bytes.
    fn get_page_data(&self) -> Vec<u8>;
}

/// Split `bytes` into (body, opaque tail).
pub fn split_body_opaque(bytes: &[u8]) -> EngineResult<(&[u8], &[u8])> {
    if bytes.len() < OPAQUE_SIZE {
        return Err(EngineError::io("page image shorter than the opaque"));
    }
    let split = bytes.len() - OPAQUE_SIZE;
    Ok((&bytes[..split], &bytes[split..]))
}

/// Read a `R` stream of `count` items, enforcing the leaf ordering
/// invariant as they come in.
pub fn decode_items<I: ArrayItem, R: Read>(
    reader: &mut R,
    count: usize,
) -> EngineResult<Vec<I>> {
    let mut items: Vec<I> = Vec::with_capacity(count);
    for _ in 0..count {
        let item = I::decode_from(reader);
        if let Some(last) = items.last() {
            if last.end_tid() > item.first_tid() {
                return Err(EngineError::invariant("leaf items overlap or are unordered"));
            }
        }
        items.push(item);
    }
    Ok(items)
}
