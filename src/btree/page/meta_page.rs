use crate::{
    btree::page_cache::PageCache,
    error::EngineError,
    io::{ByteWriter, Decodeable},
    types::EngineResult,
};

use super::{split_body_opaque, BTreePage, BTreePageID, OPAQUE_SIZE, PAGE_ID_META};

/// Where one tree starts: the root block and its level (0 = the root is
/// still a leaf).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeRoot {
    pub block: u32,
    pub level: u16,
}

/// Page 0 of the relation file: the root of the TID tree (attno 0) and
/// of every attribute tree.
pub struct MetaPage {
    pid: BTreePageID,
    roots: Vec<TreeRoot>,
}

impl MetaPage {
    pub fn new_empty(pid: &BTreePageID) -> Self {
        Self {
            pid: *pid,
            roots: Vec::new(),
        }
    }

    pub fn tree_count(&self) -> usize {
        self.roots.len()
    }

    pub fn get_root(&self, attno: u32) -> EngineResult<TreeRoot> {
        self.roots
            .get(attno as usize)
            .cloned()
            .ok_or_else(|| EngineError::not_found(&format!("no tree for attno {}", attno)))
    }

    pub fn set_root(&mut self, attno: u32, root: TreeRoot) {
        self.roots[attno as usize] = root;
    }

    /// Register a new tree; returns its attno.
    pub fn add_tree(&mut self, root: TreeRoot) -> u32 {
        self.roots.push(root);
        (self.roots.len() - 1) as u32
    }
}

impl BTreePage for MetaPage {
    fn from_bytes(pid: &BTreePageID, bytes: &[u8]) -> EngineResult<Self> {
        let (body, opaque) = split_body_opaque(bytes)?;

        let mut r = &opaque[OPAQUE_SIZE - 4..];
        let page_id = u16::decode_from(&mut r);
        if page_id != PAGE_ID_META {
            return Err(EngineError::invariant(&format!(
                "block {} is not a metapage (page id {:#x})",
                pid.page_index, page_id
            )));
        }

        let mut reader = body;
        let count = u32::decode_from(&mut reader) as usize;
        let mut roots = Vec::with_capacity(count);
        for _ in 0..count {
            let block = u32::decode_from(&mut reader);
            let level = u16::decode_from(&mut reader);
            roots.push(TreeRoot { block, level });
        }

        Ok(Self { pid: *pid, roots })
    }

    fn get_pid(&self) -> BTreePageID {
        self.pid
    }

    fn get_page_data(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write(&(self.roots.len() as u32));
        for r in &self.roots {
            w.write(&r.block);
            w.write(&r.level);
        }

        let page_size = PageCache::get_page_size();
        let mut data = w.to_padded_bytes(page_size - OPAQUE_SIZE);

        // the metapage opaque only carries the self-identification
        let mut opaque = ByteWriter::new();
        opaque.write(&0u32);
        opaque.write(&0u32);
        opaque.write(&0u64);
        opaque.write(&0u64);
        opaque.write(&0u16);
        opaque.write(&0u16);
        opaque.write(&PAGE_ID_META);
        opaque.write(&0u16);
        data.extend_from_slice(&opaque.to_bytes());
        data
    }
}
