use crate::{mvcc::LockMode, tid::Tid};

use super::txn_manager::Xid;

/// Opaque reference into the undo log. `0` is invalid ("no undo record";
/// the row version is visible to everyone).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UndoPtr(pub u64);

impl UndoPtr {
    pub const INVALID: UndoPtr = UndoPtr(0);

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn from_raw(v: u64) -> UndoPtr {
        UndoPtr(v)
    }
}

#[derive(Debug, Clone)]
pub enum UndoKind {
    Insert {
        tid: Tid,
        endtid: Tid,
        speculative_token: u64,
    },
    Delete {
        tid: Tid,
        changed_part: bool,
    },
    Update {
        tid: Tid,
        newtid: Tid,
        key_update: bool,
    },
    TupleLock {
        tid: Tid,
        mode: LockMode,
    },
}

#[derive(Debug, Clone)]
pub struct UndoRecord {
    pub xid: Xid,
    pub cid: u32,
    pub table_id: u32,

    /// Previous record in this tuple's history; the visibility walk
    /// follows it when the newest record does not decide by itself.
    pub prev: UndoPtr,

    pub kind: UndoKind,
}

/// Append-only undo record store. Records are never mutated once
/// emitted; pointers are 1-based indexes so `0` stays invalid.
pub struct UndoLog {
    records: Vec<UndoRecord>,
}

impl UndoLog {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn emit(&mut self, record: UndoRecord) -> UndoPtr {
        self.records.push(record);
        UndoPtr(self.records.len() as u64)
    }

    pub fn get(&self, ptr: UndoPtr) -> Option<&UndoRecord> {
        if !ptr.is_valid() {
            return None;
        }
        self.records.get((ptr.0 - 1) as usize)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
