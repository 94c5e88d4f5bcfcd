use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use once_cell::sync::OnceCell;

use crate::{
    btree::page_cache::PageCache,
    catalog::Catalog,
    mvcc::{TransactionManager, UndoLog},
    types::Pod,
    utils::HandyRwLock,
};

/// We collect all global variables here.
///
/// These cannot be plain statics because their constructors are not
/// const; and each one lives behind its own lock because they are hit
/// from concurrent transactions with very different access patterns.
pub struct Database {
    page_cache: Pod<PageCache>,
    catalog: Pod<Catalog>,
    transaction_manager: Pod<TransactionManager>,
    undo_log: Pod<UndoLog>,
}

static SINGLETON: OnceCell<Database> = OnceCell::new();

impl Database {
    fn new() -> Self {
        Self {
            page_cache: Arc::new(RwLock::new(PageCache::new())),
            catalog: Arc::new(RwLock::new(Catalog::new())),
            transaction_manager: Arc::new(RwLock::new(TransactionManager::new())),
            undo_log: Arc::new(RwLock::new(UndoLog::new())),
        }
    }

    pub fn global() -> &'static Self {
        SINGLETON.get_or_init(Database::new)
    }

    /// Reset the in-memory state, used by tests. Relation files on disk
    /// are untouched; tables re-register on creation.
    pub fn reset() {
        let db = Self::global();
        db.page_cache.rl().clear();
        db.catalog.rl().clear();
        *db.transaction_manager.wl() = TransactionManager::new();
        db.undo_log.wl().clear();
    }

    pub fn page_cache() -> RwLockReadGuard<'static, PageCache> {
        Self::global().page_cache.rl()
    }

    pub fn catalog() -> RwLockReadGuard<'static, Catalog> {
        Self::global().catalog.rl()
    }

    pub fn transaction_manager() -> RwLockReadGuard<'static, TransactionManager> {
        Self::global().transaction_manager.rl()
    }

    pub fn mut_transaction_manager() -> RwLockWriteGuard<'static, TransactionManager> {
        Self::global().transaction_manager.wl()
    }

    pub fn undo_log() -> RwLockReadGuard<'static, UndoLog> {
        Self::global().undo_log.rl()
    }

    pub fn mut_undo_log() -> RwLockWriteGuard<'static, UndoLog> {
        Self::global().undo_log.wl()
    }
}
