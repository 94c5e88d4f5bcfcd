use crate::{
    btree::table::ColumnarTable,
    error::EngineError,
    types::{ConcurrentHashMap, Pod, ResultPod},
};

/// Table-id to table registry. The page cache resolves relation files
/// through it when faulting pages in.
pub struct Catalog {
    tables: ConcurrentHashMap<u32, Pod<ColumnarTable>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            tables: ConcurrentHashMap::new(),
        }
    }

    pub fn add_table(&self, table: Pod<ColumnarTable>) {
        let id = {
            let t = table.read().unwrap();
            t.get_id()
        };
        self.tables.insert(id, table);
    }

    pub fn get_table(&self, table_id: u32) -> ResultPod<ColumnarTable> {
        self.tables
            .get(&table_id)
            .ok_or_else(|| EngineError::not_found(&format!("table {} not found", table_id)))
    }

    pub fn clear(&self) {
        self.tables.clear();
    }
}
