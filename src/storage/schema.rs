use super::datum::{ColumnType, Datum};

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub ctype: ColumnType,

    /// For columns created by add-column: the value a tid reads as when
    /// the attribute tree has no entry for it. `None` means NULL.
    pub missing_default: Option<Datum>,
}

impl Column {
    pub fn new(name: &str, ctype: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            ctype,
            missing_default: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Schema {
    pub columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// n integer columns named `c1..cn`, handy for tests.
    pub fn small_int_schema(columns: usize) -> Self {
        let mut v = Vec::new();
        for i in 0..columns {
            v.push(Column::new(&format!("c{}", i + 1), ColumnType::Int));
        }
        Self::new(v)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn get_column(&self, index: usize) -> &Column {
        &self.columns[index]
    }
}
