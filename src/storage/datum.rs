use core::fmt;
use std::convert::TryInto;

use crate::io::{read_exact, Encodeable};

/// The physical type of a column. The engine stores bytes; anything
/// richer is the type system's problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    Bytes,
}

/// A single column value.
///
/// Encoding is untagged (the column type is known from the schema), so
/// decoding requires the `ColumnType`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datum {
    Int(i64),
    Bytes(Vec<u8>),
}

impl Datum {
    pub fn int(v: i64) -> Datum {
        Datum::Int(v)
    }

    pub fn bytes(v: &[u8]) -> Datum {
        Datum::Bytes(v.to_vec())
    }

    /// Placeholder slotted into exploded arrays for NULL positions.
    pub fn null_placeholder(t: ColumnType) -> Datum {
        match t {
            ColumnType::Int => Datum::Int(0),
            ColumnType::Bytes => Datum::Bytes(Vec::new()),
        }
    }

    pub fn get_int(&self) -> i64 {
        match self {
            Datum::Int(v) => *v,
            Datum::Bytes(_) => panic!("datum is not an int"),
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            Datum::Int(_) => ColumnType::Int,
            Datum::Bytes(_) => ColumnType::Bytes,
        }
    }

    pub fn disk_size(&self) -> usize {
        match self {
            Datum::Int(_) => 8,
            Datum::Bytes(b) => 4 + b.len(),
        }
    }

    pub fn decode_from<R: std::io::Read>(reader: &mut R, t: ColumnType) -> Datum {
        match t {
            ColumnType::Int => {
                let bytes = read_exact(reader, 8);
                Datum::Int(i64::from_le_bytes(bytes.try_into().unwrap()))
            }
            ColumnType::Bytes => {
                let len = u32::from_le_bytes(read_exact(reader, 4).try_into().unwrap());
                Datum::Bytes(read_exact(reader, len as usize))
            }
        }
    }
}

impl Encodeable for Datum {
    fn encode(&self) -> Vec<u8> {
        match self {
            Datum::Int(v) => v.to_le_bytes().to_vec(),
            Datum::Bytes(b) => {
                let mut buf = Vec::with_capacity(4 + b.len());
                buf.extend_from_slice(&(b.len() as u32).to_le_bytes());
                buf.extend_from_slice(b);
                buf
            }
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Datum::Int(v) => write!(f, "{}", v),
            Datum::Bytes(b) => write!(f, "{} bytes", b.len()),
        }
    }
}
