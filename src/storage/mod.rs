pub mod datum;
pub mod schema;

pub use datum::{ColumnType, Datum};
pub use schema::{Column, Schema};

use crate::tid::Tid;

/// One row as the executor hands it to the engine: one slot per column,
/// `None` meaning NULL.
pub type Row = Vec<Option<Datum>>;

/// One column's worth of a multi-insert, already in ascending tid order.
pub struct ColumnChunk {
    pub tids: Vec<Tid>,
    pub datums: Vec<Datum>,
    pub isnulls: Vec<bool>,
}
