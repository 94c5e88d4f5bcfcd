// not every test binary touches every helper
#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use once_cell::sync::Lazy;

use colstore::{
    btree::page_cache::{PageCache, DEFAULT_PAGE_SIZE},
    btree::vacuum::{set_dead_tids_budget, DEFAULT_DEAD_TIDS_BUDGET},
    types::Pod,
    utils, ColumnarTable, Database, Datum, Row, Schema, Tid, Transaction,
};

/// The engine state is process-global; tests in one binary take this
/// lock so their resets do not trample each other.
static TEST_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// # Conduct the initialization
///
/// - Set up log configuration.
/// - Reset page size and vacuum budget.
/// - Reset the global database state.
pub fn setup() -> MutexGuard<'static, ()> {
    let guard = match TEST_LOCK.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    };

    utils::init_log();
    PageCache::set_page_size(DEFAULT_PAGE_SIZE);
    set_dead_tids_budget(DEFAULT_DEAD_TIDS_BUDGET);
    Database::reset();

    guard
}

pub fn table_path(name: &str) -> String {
    let dir = std::env::temp_dir().join("colstore_tests");
    std::fs::create_dir_all(&dir).expect("io error");
    dir.join(name).to_str().expect("bad path").to_string()
}

/// A registered table with `columns` integer columns `c1..cn`.
pub fn new_int_table(name: &str, columns: usize) -> Pod<ColumnarTable> {
    let schema = Schema::small_int_schema(columns);
    let table = ColumnarTable::new(&table_path(name), &schema).expect("table creation failed");
    let table_rc = Arc::new(RwLock::new(table));
    Database::catalog().add_table(Arc::clone(&table_rc));
    table_rc
}

pub fn int_row(values: &[i64]) -> Row {
    values.iter().map(|v| Some(Datum::Int(*v))).collect()
}

pub fn as_ints(row: &Row) -> Vec<Option<i64>> {
    row.iter()
        .map(|v| v.as_ref().map(|d| d.get_int()))
        .collect()
}

/// Scan everything a fresh transaction sees, as plain integers.
pub fn scan_ints(table: &ColumnarTable) -> Vec<Vec<Option<i64>>> {
    let tx = Transaction::new();
    let mut scan = table.scan(&tx, None);
    let mut rows = Vec::new();
    while let Some((_, row)) = scan.next_row().expect("scan failed") {
        rows.push(as_ints(&row));
    }
    tx.commit().unwrap();
    rows
}

/// Like `scan_ints`, with the tids.
pub fn scan_with_tids(table: &ColumnarTable) -> Vec<(Tid, Vec<Option<i64>>)> {
    let tx = Transaction::new();
    let mut scan = table.scan(&tx, None);
    let mut rows = Vec::new();
    while let Some((tid, row)) = scan.next_row().expect("scan failed") {
        rows.push((tid, as_ints(&row)));
    }
    tx.commit().unwrap();
    rows
}

/// Insert `(i, i+1, ..., i+columns-1)` for each i in `values`, one
/// committed transaction for the whole batch. Returns the tids.
pub fn insert_sequence(table: &ColumnarTable, values: std::ops::Range<i64>) -> Vec<Tid> {
    let columns = table.column_count();
    let rows: Vec<Row> = values
        .map(|i| (0..columns as i64).map(|c| Some(Datum::Int(i + c))).collect())
        .collect();

    let tx = Transaction::new();
    let tids = table
        .multi_insert_rows(&tx, &rows)
        .expect("insert failed");
    tx.commit().unwrap();
    tids
}
