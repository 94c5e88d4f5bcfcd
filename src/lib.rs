pub mod btree;
pub mod catalog;
pub mod compress;
pub mod error;
pub mod io;
pub mod mvcc;
pub mod storage;
pub mod tid;
pub mod transaction;
pub mod types;
pub mod utils;

mod database;

pub use btree::scan::TableScan;
pub use btree::table::ColumnarTable;
pub use catalog::Catalog;
pub use database::Database;
pub use error::{EngineError, ErrorKind};
pub use mvcc::{LockMode, TmResult};
pub use storage::{ColumnType, Datum, Row, Schema};
pub use tid::Tid;
pub use transaction::Transaction;
