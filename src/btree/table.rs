use core::fmt;
use std::{
    collections::hash_map::DefaultHasher,
    fs::{File, OpenOptions},
    hash::{Hash, Hasher},
    io::{Read, Seek, SeekFrom, Write},
    sync::{
        atomic::{AtomicU32, Ordering},
        Mutex, MutexGuard, RwLock,
    },
    time::SystemTime,
};

use log::debug;

use crate::{
    database::Database,
    error::EngineError,
    storage::{Column, ColumnType, Datum, Schema},
    tid::Tid,
    types::{EngineResult, ResultPod, SimpleResult},
    utils::HandyRwLock,
};

use super::{
    page::{BTreePage, BTreePageID, MetaPage, PageCategory, TreeRoot, TID_TREE_ATTNO},
    page_cache::{AttrLeafPage, PageCache, TidLeafPage},
};

/// A columnar table: one TID tree plus one attribute tree per column,
/// all in a single relation file whose page 0 is the metapage.
pub struct ColumnarTable {
    file_path: String,

    schema: RwLock<Schema>,

    file: Mutex<File>,

    table_id: u32,

    /// The page index of the last page in the file. Index 0 is the
    /// metapage; allocation increases monotonically, freed pages are
    /// not reused (the free-page map is an external concern).
    page_index: AtomicU32,
}

impl fmt::Display for ColumnarTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<ColumnarTable, file: {}, id: {}>",
            self.file_path, self.table_id
        )
    }
}

impl ColumnarTable {
    pub fn new(file_path: &str, schema: &Schema) -> EngineResult<Self> {
        File::create(file_path).map_err(|e| EngineError::io(&e.to_string()))?;

        let f = OpenOptions::new()
            .write(true)
            .read(true)
            .open(file_path)
            .map_err(|e| EngineError::io(&e.to_string()))?;

        let mut hasher = DefaultHasher::new();
        file_path.hash(&mut hasher);
        let unix_time = SystemTime::now();
        unix_time.hash(&mut hasher);
        let table_id = hasher.finish() as u32;

        let table = Self {
            file_path: file_path.to_string(),
            schema: RwLock::new(schema.clone()),
            file: Mutex::new(f),
            table_id,
            page_index: AtomicU32::new(0),
        };

        table.file_init()?;
        Ok(table)
    }

    /// Lay out the metapage and one empty leaf root per tree: the TID
    /// tree first, then one attribute tree per column.
    fn file_init(&self) -> SimpleResult {
        let meta_pid = self.meta_pid();
        let mut meta = MetaPage::new_empty(&meta_pid);

        let tree_count = 1 + self.schema.rl().column_count() as u32;
        for attno in 0..tree_count {
            let root = self.create_empty_tree(attno)?;
            meta.add_tree(root);
        }

        self.write_page_bytes(0, &meta.get_page_data())?;
        Database::page_cache().install_page(meta);

        debug!("{} initialized with {} trees", self, tree_count);
        Ok(())
    }

    /// A fresh single-leaf tree covering the whole keyspace.
    pub(crate) fn create_empty_tree(&self, attno: u32) -> EngineResult<TreeRoot> {
        let block = self.allocate_block()?;
        let pid = self.leaf_pid(attno, block);

        if attno == TID_TREE_ATTNO {
            let mut leaf = TidLeafPage::new_empty(&pid, attno, Tid::MIN, Tid::MAX_PLUS_ONE);
            leaf.set_root(true);
            self.flush_page(&leaf)?;
            Database::page_cache().install_page(leaf);
        } else {
            let mut leaf = AttrLeafPage::new_empty(&pid, attno, Tid::MIN, Tid::MAX_PLUS_ONE);
            leaf.set_root(true);
            self.flush_page(&leaf)?;
            Database::page_cache().install_page(leaf);
        }

        Ok(TreeRoot { block, level: 0 })
    }

    pub fn get_id(&self) -> u32 {
        self.table_id
    }

    pub fn get_schema(&self) -> Schema {
        self.schema.rl().clone()
    }

    pub fn column_count(&self) -> usize {
        self.schema.rl().column_count()
    }

    /// The schema column behind attribute tree `attno` (1-based).
    pub fn column_for_attno(&self, attno: u32) -> Column {
        self.schema.rl().get_column(attno as usize - 1).clone()
    }

    pub fn column_type(&self, attno: u32) -> ColumnType {
        self.column_for_attno(attno).ctype
    }

    /// Add a column with an optional default; existing rows read the
    /// default because their tids are simply absent from the new tree.
    pub fn add_column(
        &self,
        name: &str,
        ctype: ColumnType,
        missing_default: Option<Datum>,
    ) -> EngineResult<u32> {
        let root = self.create_empty_tree(self.tree_count()?)?;

        let attno;
        {
            let meta_pod = self.get_meta_page()?;
            let mut meta = meta_pod.wl();
            attno = meta.add_tree(root);
            self.flush_page(&*meta)?;
        }

        let mut column = Column::new(name, ctype);
        column.missing_default = missing_default;
        self.schema.wl().columns.push(column);

        debug!("{} added column {} as attno {}", self, name, attno);
        Ok(attno)
    }

    // ------------------------------------------------------------------
    // metapage access
    // ------------------------------------------------------------------

    pub fn meta_pid(&self) -> BTreePageID {
        BTreePageID::new(PageCategory::Meta, self.table_id, 0)
    }

    pub fn get_meta_page(&self) -> ResultPod<MetaPage> {
        Database::page_cache().get_meta_page(&self.meta_pid())
    }

    pub fn tree_count(&self) -> EngineResult<u32> {
        Ok(self.get_meta_page()?.rl().tree_count() as u32)
    }

    pub fn get_tree_root(&self, attno: u32) -> EngineResult<TreeRoot> {
        self.get_meta_page()?.rl().get_root(attno)
    }

    pub fn set_tree_root(&self, attno: u32, root: TreeRoot) -> SimpleResult {
        let meta_pod = self.get_meta_page()?;
        let mut meta = meta_pod.wl();
        meta.set_root(attno, root);
        self.flush_page(&*meta)
    }

    // ------------------------------------------------------------------
    // page ids and allocation
    // ------------------------------------------------------------------

    pub fn leaf_pid(&self, attno: u32, block: u32) -> BTreePageID {
        BTreePageID::new(BTreePageID::leaf_category(attno), self.table_id, block)
    }

    pub fn internal_pid(&self, block: u32) -> BTreePageID {
        BTreePageID::new(PageCategory::Internal, self.table_id, block)
    }

    /// Claim the next block number and extend the file with a zero
    /// page, so running out of disk space surfaces here and not inside
    /// a critical section.
    pub fn allocate_block(&self) -> EngineResult<u32> {
        let block = self.page_index.fetch_add(1, Ordering::Relaxed) + 1;
        let zeros = vec![0u8; PageCache::get_page_size()];
        self.write_page_bytes(block, &zeros)?;
        Ok(block)
    }

    pub fn pages_count(&self) -> usize {
        self.page_index.load(Ordering::Relaxed) as usize + 1
    }

    // ------------------------------------------------------------------
    // file io
    // ------------------------------------------------------------------

    fn get_file(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap()
    }

    pub fn read_page_bytes(&self, page_index: u32) -> EngineResult<Vec<u8>> {
        let page_size = PageCache::get_page_size();
        let start_pos = page_index as usize * page_size;

        let mut file = self.get_file();
        file.seek(SeekFrom::Start(start_pos as u64))
            .map_err(|e| EngineError::io(&e.to_string()))?;

        let mut buf: Vec<u8> = vec![0; page_size];
        file.read_exact(&mut buf)
            .map_err(|e| EngineError::io(&e.to_string()))?;
        Ok(buf)
    }

    pub fn write_page_bytes(&self, page_index: u32, bytes: &[u8]) -> SimpleResult {
        let page_size = PageCache::get_page_size();
        let start_pos = page_index as usize * page_size;

        let mut file = self.get_file();
        file.seek(SeekFrom::Start(start_pos as u64))
            .map_err(|e| EngineError::io(&e.to_string()))?;
        file.write_all(bytes)
            .map_err(|e| EngineError::io(&e.to_string()))?;
        file.flush().map_err(|e| EngineError::io(&e.to_string()))?;
        Ok(())
    }

    /// Write a page's current image back to the relation file.
    pub fn flush_page<P: BTreePage>(&self, page: &P) -> SimpleResult {
        self.write_page_bytes(page.get_pid().page_index, &page.get_page_data())
    }
}

