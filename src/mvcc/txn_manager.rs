use std::collections::{BTreeSet, HashMap, HashSet};

use log::debug;

use super::snapshot::{IsolationLevel, Snapshot};

pub type Xid = u64;

pub const INVALID_XID: Xid = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum XidState {
    Active,
    Committed,
    Aborted,
}

/// Transaction id allocation and commit state.
///
/// The engine only ever asks three questions: is this xid committed, is
/// it aborted, and what is the oldest xid any live snapshot could still
/// care about (the vacuum horizon).
pub struct TransactionManager {
    next_xid: Xid,
    states: HashMap<Xid, XidState>,
    active: BTreeSet<Xid>,
    aborted: HashSet<Xid>,

    /// Cross-snapshot rw-conflicts observed by serializable scans.
    serializable_conflicts: Vec<(Xid, Xid)>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_xid: 1,
            states: HashMap::new(),
            active: BTreeSet::new(),
            aborted: HashSet::new(),
            serializable_conflicts: Vec::new(),
        }
    }

    pub fn begin(&mut self) -> Xid {
        let xid = self.next_xid;
        self.next_xid += 1;
        self.states.insert(xid, XidState::Active);
        self.active.insert(xid);
        debug!("begin xid {}", xid);
        xid
    }

    pub fn snapshot(&self, xid: Xid, isolation: IsolationLevel) -> Snapshot {
        Snapshot {
            xmin: self.active.iter().next().cloned().unwrap_or(self.next_xid),
            xmax: self.next_xid,
            active: self.active.iter().cloned().collect(),
            aborted: self.aborted.clone(),
            xid,
            isolation,
        }
    }

    pub fn commit(&mut self, xid: Xid) {
        self.states.insert(xid, XidState::Committed);
        self.active.remove(&xid);
        debug!("commit xid {}", xid);
    }

    pub fn abort(&mut self, xid: Xid) {
        self.states.insert(xid, XidState::Aborted);
        self.active.remove(&xid);
        self.aborted.insert(xid);
        debug!("abort xid {}", xid);
    }

    pub fn is_active(&self, xid: Xid) -> bool {
        self.states.get(&xid) == Some(&XidState::Active)
    }

    pub fn is_committed(&self, xid: Xid) -> bool {
        self.states.get(&xid) == Some(&XidState::Committed)
    }

    pub fn is_aborted(&self, xid: Xid) -> bool {
        self.states.get(&xid) == Some(&XidState::Aborted)
    }

    /// Oldest xid that could still be invisible to some live snapshot.
    /// Everything committed strictly below it is all-visible.
    pub fn oldest_active_xid(&self) -> Xid {
        self.active.iter().next().cloned().unwrap_or(self.next_xid)
    }

    /// True once `xid` is committed and no live snapshot can miss it.
    pub fn is_all_visible(&self, xid: Xid) -> bool {
        self.is_committed(xid) && xid < self.oldest_active_xid()
    }

    pub fn record_serializable_conflict(&mut self, reader: Xid, writer: Xid) {
        debug!(
            "serializable conflict out, reader {} vs writer {}",
            reader, writer
        );
        self.serializable_conflicts.push((reader, writer));
    }

    pub fn serializable_conflicts(&self) -> &[(Xid, Xid)] {
        &self.serializable_conflicts
    }
}
