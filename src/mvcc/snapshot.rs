use std::collections::HashSet;

use super::txn_manager::Xid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    Snapshot,
    Serializable,
}

/// A point-in-time view of which transactions count as committed.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Oldest xid that was still running when the snapshot was taken.
    pub xmin: Xid,
    /// First xid not yet assigned at snapshot time.
    pub xmax: Xid,
    /// Xids running at snapshot time.
    pub active: Vec<Xid>,
    /// Xids known aborted at snapshot time. Transactions that abort
    /// later were in `active` and are invisible either way.
    pub aborted: HashSet<Xid>,
    /// The observing transaction.
    pub xid: Xid,

    pub isolation: IsolationLevel,
}

impl Snapshot {
    /// Did `xid`'s effects happen before this snapshot?
    pub fn sees(&self, xid: Xid) -> bool {
        if xid == self.xid {
            return true;
        }
        if self.aborted.contains(&xid) {
            return false;
        }
        if xid >= self.xmax {
            return false;
        }
        if xid < self.xmin {
            return true;
        }
        !self.active.contains(&xid)
    }

    pub fn is_serializable(&self) -> bool {
        self.isolation == IsolationLevel::Serializable
    }
}
