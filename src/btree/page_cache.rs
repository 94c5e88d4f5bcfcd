use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, RwLock,
};

use log::debug;

use crate::{
    database::Database,
    error::EngineError,
    types::{ConcurrentHashMap, Pod, ResultPod},
    utils::HandyRwLock,
};

use super::{
    attr_item::AttrItem,
    page::{
        BTreeInternalPage, BTreeLeafPage, BTreePage, BTreePageID, MetaPage, PageCategory,
    },
    tid_item::TidRunItem,
};

pub const DEFAULT_PAGE_SIZE: usize = 8192;
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_PAGE_SIZE);

pub type TidLeafPage = BTreeLeafPage<TidRunItem>;
pub type AttrLeafPage = BTreeLeafPage<AttrItem>;

/// The buffer manager stand-in: every page the engine touches lives
/// here as a `Pod`. Cloning the pod is the pin; its `RwLock` is the
/// buffer lock.
pub struct PageCache {
    pub meta_buffer: ConcurrentHashMap<BTreePageID, Pod<MetaPage>>,
    pub internal_buffer: ConcurrentHashMap<BTreePageID, Pod<BTreeInternalPage>>,
    pub tid_leaf_buffer: ConcurrentHashMap<BTreePageID, Pod<TidLeafPage>>,
    pub attr_leaf_buffer: ConcurrentHashMap<BTreePageID, Pod<AttrLeafPage>>,
}

/// Which buffer a page type lives in.
pub trait PageStore<P: BTreePage> {
    fn buffer(&self) -> &ConcurrentHashMap<BTreePageID, Pod<P>>;
}

impl PageStore<MetaPage> for PageCache {
    fn buffer(&self) -> &ConcurrentHashMap<BTreePageID, Pod<MetaPage>> {
        &self.meta_buffer
    }
}

impl PageStore<BTreeInternalPage> for PageCache {
    fn buffer(&self) -> &ConcurrentHashMap<BTreePageID, Pod<BTreeInternalPage>> {
        &self.internal_buffer
    }
}

impl PageStore<TidLeafPage> for PageCache {
    fn buffer(&self) -> &ConcurrentHashMap<BTreePageID, Pod<TidLeafPage>> {
        &self.tid_leaf_buffer
    }
}

impl PageStore<AttrLeafPage> for PageCache {
    fn buffer(&self) -> &ConcurrentHashMap<BTreePageID, Pod<AttrLeafPage>> {
        &self.attr_leaf_buffer
    }
}

impl PageCache {
    pub fn new() -> Self {
        Self {
            meta_buffer: ConcurrentHashMap::new(),
            internal_buffer: ConcurrentHashMap::new(),
            tid_leaf_buffer: ConcurrentHashMap::new(),
            attr_leaf_buffer: ConcurrentHashMap::new(),
        }
    }

    pub fn clear(&self) {
        self.meta_buffer.clear();
        self.internal_buffer.clear();
        self.tid_leaf_buffer.clear();
        self.attr_leaf_buffer.clear();
    }

    /// Fetch a page, loading it from the relation file on a miss.
    /// The returned pod is the caller's pin; lock it as needed.
    pub fn get_page<P: BTreePage>(&self, pid: &BTreePageID) -> ResultPod<P>
    where
        Self: PageStore<P>,
    {
        PageStore::<P>::buffer(self).get_or_insert(pid, |pid| {
            let page = Self::load_page::<P>(pid)?;
            Ok(Arc::new(RwLock::new(page)))
        })
    }

    /// Hand a freshly built page to the cache without touching disk.
    pub fn install_page<P: BTreePage>(&self, page: P)
    where
        Self: PageStore<P>,
    {
        let pid = page.get_pid();
        PageStore::<P>::buffer(self).insert(pid, Arc::new(RwLock::new(page)));
    }

    fn load_page<P: BTreePage>(pid: &BTreePageID) -> Result<P, EngineError> {
        let catalog = Database::catalog();
        let table_pod = catalog.get_table(pid.table_id)?;
        let table = table_pod.rl();

        debug!("loading page {} from disk", pid);
        let bytes = table.read_page_bytes(pid.page_index)?;
        P::from_bytes(pid, &bytes)
    }

    pub fn get_meta_page(&self, pid: &BTreePageID) -> ResultPod<MetaPage> {
        self.get_page::<MetaPage>(pid)
    }

    pub fn get_internal_page(&self, pid: &BTreePageID) -> ResultPod<BTreeInternalPage> {
        self.get_page::<BTreeInternalPage>(pid)
    }

    pub fn get_tid_leaf_page(&self, pid: &BTreePageID) -> ResultPod<TidLeafPage> {
        self.get_page::<TidLeafPage>(pid)
    }

    pub fn get_attr_leaf_page(&self, pid: &BTreePageID) -> ResultPod<AttrLeafPage> {
        self.get_page::<AttrLeafPage>(pid)
    }

    /// Drop a page from the cache, e.g. after unlink. The next access
    /// would re-read whatever is on disk.
    pub fn discard_page(&self, pid: &BTreePageID) {
        match pid.category {
            PageCategory::Meta => self.meta_buffer.remove(pid),
            PageCategory::Internal => self.internal_buffer.remove(pid),
            PageCategory::TidLeaf => self.tid_leaf_buffer.remove(pid),
            PageCategory::AttrLeaf => self.attr_leaf_buffer.remove(pid),
        }
    }

    pub fn set_page_size(page_size: usize) {
        PAGE_SIZE.store(page_size, Ordering::Relaxed);
    }

    pub fn get_page_size() -> usize {
        PAGE_SIZE.load(Ordering::Relaxed)
    }
}
