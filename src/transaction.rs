use core::fmt;
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Mutex,
};

use log::debug;

use crate::{
    database::Database,
    mvcc::{IsolationLevel, Snapshot, UndoKind, UndoPtr, UndoRecord, Xid},
    types::SimpleResult,
    utils::HandyRwLock,
};

/// One transaction: an xid, the snapshot it reads with, and the trail
/// of undo records it has written (walked backwards on abort).
pub struct Transaction {
    xid: Xid,
    snapshot: Snapshot,

    /// Current command id within the transaction.
    cid: AtomicU32,

    undo_trail: Mutex<Vec<UndoPtr>>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::new_with_isolation(IsolationLevel::Snapshot)
    }

    pub fn new_serializable() -> Self {
        Self::new_with_isolation(IsolationLevel::Serializable)
    }

    pub fn new_with_isolation(isolation: IsolationLevel) -> Self {
        let mut txmgr = Database::mut_transaction_manager();
        let xid = txmgr.begin();
        let snapshot = txmgr.snapshot(xid, isolation);

        Self {
            xid,
            snapshot,
            cid: AtomicU32::new(0),
            undo_trail: Mutex::new(Vec::new()),
        }
    }

    pub fn get_xid(&self) -> Xid {
        self.xid
    }

    pub fn get_snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Bump the command counter; statements within a transaction call
    /// this between executions.
    pub fn advance_command(&self) {
        self.cid.fetch_add(1, Ordering::Relaxed);
    }

    /// Append an undo record on this transaction's behalf and remember
    /// it for rollback.
    pub fn emit_undo(&self, table_id: u32, prev: UndoPtr, kind: UndoKind) -> UndoPtr {
        let record = UndoRecord {
            xid: self.xid,
            cid: self.cid.load(Ordering::Relaxed),
            table_id,
            prev,
            kind,
        };
        let ptr = Database::mut_undo_log().emit(record);
        self.undo_trail.lock().unwrap().push(ptr);
        ptr
    }

    pub fn commit(&self) -> SimpleResult {
        Database::mut_transaction_manager().commit(self.xid);
        Ok(())
    }

    /// Abort and apply this transaction's undo, newest record first:
    /// inserted tids are marked dead, deletes/locks are backed out.
    pub fn abort(&self) -> SimpleResult {
        Database::mut_transaction_manager().abort(self.xid);

        let trail: Vec<UndoPtr> = {
            let mut guard = self.undo_trail.lock().unwrap();
            guard.drain(..).collect()
        };

        for ptr in trail.iter().rev() {
            let record = match Database::undo_log().get(*ptr) {
                Some(r) => r.clone(),
                None => continue,
            };

            let table_pod = match Database::catalog().get_table(record.table_id) {
                Ok(t) => t,
                Err(_) => {
                    debug!("undo apply: table {} is gone, skipping", record.table_id);
                    continue;
                }
            };
            let table = table_pod.rl();

            match record.kind {
                UndoKind::Insert { tid, endtid, .. } => {
                    let mut t = tid;
                    while t < endtid {
                        table.tid_mark_dead(t)?;
                        t = t.next();
                    }
                }
                UndoKind::Delete { tid, .. } => {
                    table.tid_undo_deletion(tid, *ptr)?;
                }
                UndoKind::Update { tid, newtid, .. } => {
                    table.tid_undo_deletion(tid, *ptr)?;
                    table.tid_mark_dead(newtid)?;
                }
                UndoKind::TupleLock { tid, .. } => {
                    table.tid_undo_deletion(tid, *ptr)?;
                }
            }
        }

        Ok(())
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tx_{}", self.xid)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
