use log::debug;

use crate::tid::Tid;

use super::{
    snapshot::Snapshot,
    txn_manager::{TransactionManager, Xid},
    undo_log::{UndoKind, UndoLog, UndoPtr},
    LockMode,
};

/// Outcome of the visibility check on one row version.
#[derive(Debug, Clone)]
pub struct Visibility {
    pub visible: bool,

    /// A committed xid whose effect on this row our snapshot does not
    /// see: a delete/update we read past, or an insert we skip. Valid
    /// values feed the serializable conflict-out check.
    pub obsoleting_xid: Option<Xid>,

    /// Where the row went, when an update superseded it.
    pub next_tid: Option<Tid>,
}

impl Visibility {
    fn visible() -> Visibility {
        Visibility {
            visible: true,
            obsoleting_xid: None,
            next_tid: None,
        }
    }

    fn invisible() -> Visibility {
        Visibility {
            visible: false,
            obsoleting_xid: None,
            next_tid: None,
        }
    }
}

/// `TM_Result` of the update-oriented check: not errors, just answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TmResult {
    Ok,
    SelfModified,
    Invisible,
    BeingModified,
    Updated,
}

#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub result: TmResult,

    /// Whether a new undo record must chain onto the existing pointer
    /// (the old record is still needed by some live snapshot).
    pub keep_old_undo_ptr: bool,

    pub next_tid: Option<Tid>,
}

impl UpdateOutcome {
    fn new(result: TmResult, keep_old_undo_ptr: bool) -> UpdateOutcome {
        UpdateOutcome {
            result,
            keep_old_undo_ptr,
            next_tid: None,
        }
    }
}

/// Is the row version guarded by `ptr` visible under `snapshot`?
///
/// An invalid pointer means the version is frozen: visible to everyone.
pub fn satisfies_visibility(snapshot: &Snapshot, ptr: UndoPtr, log: &UndoLog) -> Visibility {
    if !ptr.is_valid() {
        return Visibility::visible();
    }

    let record = match log.get(ptr) {
        Some(r) => r,
        None => {
            debug!("dangling undo pointer {:?}, treating as frozen", ptr);
            return Visibility::visible();
        }
    };

    match &record.kind {
        UndoKind::Insert { .. } => {
            if snapshot.sees(record.xid) {
                Visibility::visible()
            } else {
                let mut v = Visibility::invisible();
                if !snapshot.aborted.contains(&record.xid) && record.xid < snapshot.xmax {
                    // committed by the time we look, just not in our past
                    v.obsoleting_xid = Some(record.xid);
                }
                v
            }
        }
        UndoKind::Delete { .. } => {
            if snapshot.sees(record.xid) {
                let mut v = Visibility::invisible();
                v.obsoleting_xid = None;
                v
            } else {
                // the delete is not in our past: the row is still visible,
                // but someone else has (or had) designs on it
                let mut v = satisfies_visibility(snapshot, record.prev, log);
                if v.visible && !snapshot.aborted.contains(&record.xid) {
                    v.obsoleting_xid = Some(record.xid);
                }
                v
            }
        }
        UndoKind::Update { newtid, .. } => {
            if snapshot.sees(record.xid) {
                let mut v = Visibility::invisible();
                v.next_tid = Some(*newtid);
                v
            } else {
                let mut v = satisfies_visibility(snapshot, record.prev, log);
                if v.visible && !snapshot.aborted.contains(&record.xid) {
                    v.obsoleting_xid = Some(record.xid);
                    v.next_tid = Some(*newtid);
                }
                v
            }
        }
        UndoKind::TupleLock { .. } => satisfies_visibility(snapshot, record.prev, log),
    }
}

/// May `snapshot`'s transaction delete/update/lock the row guarded by
/// `ptr`? Answers with a `TmResult` plus whether a new undo record
/// should keep the old pointer as its `prev`.
pub fn satisfies_update(
    snapshot: &Snapshot,
    tid: Tid,
    ptr: UndoPtr,
    mode: LockMode,
    log: &UndoLog,
    txmgr: &TransactionManager,
) -> UpdateOutcome {
    if !ptr.is_valid() {
        // frozen row: modifiable, nothing to chain onto
        return UpdateOutcome::new(TmResult::Ok, false);
    }

    let record = match log.get(ptr) {
        Some(r) => r,
        None => return UpdateOutcome::new(TmResult::Ok, false),
    };

    match &record.kind {
        UndoKind::Insert { .. } => {
            if record.xid == snapshot.xid {
                return UpdateOutcome::new(TmResult::Ok, true);
            }
            if txmgr.is_active(record.xid) || txmgr.is_aborted(record.xid) {
                return UpdateOutcome::new(TmResult::Invisible, false);
            }
            if snapshot.sees(record.xid) {
                UpdateOutcome::new(TmResult::Ok, !txmgr.is_all_visible(record.xid))
            } else {
                UpdateOutcome::new(TmResult::Invisible, false)
            }
        }
        UndoKind::Delete { .. } => {
            deleted_outcome(snapshot, tid, record.xid, record.prev, None, mode, log, txmgr)
        }
        UndoKind::Update { newtid, .. } => deleted_outcome(
            snapshot,
            tid,
            record.xid,
            record.prev,
            Some(*newtid),
            mode,
            log,
            txmgr,
        ),
        UndoKind::TupleLock {
            mode: held_mode, ..
        } => {
            if record.xid != snapshot.xid
                && txmgr.is_active(record.xid)
                && lock_conflicts(*held_mode, mode)
            {
                let mut o = UpdateOutcome::new(TmResult::BeingModified, true);
                o.next_tid = None;
                return o;
            }
            // look through the lock at the record underneath
            let mut o = satisfies_update(snapshot, tid, record.prev, mode, log, txmgr);
            o.keep_old_undo_ptr = true;
            o
        }
    }
}

fn deleted_outcome(
    snapshot: &Snapshot,
    tid: Tid,
    xid: Xid,
    prev: UndoPtr,
    newtid: Option<Tid>,
    mode: LockMode,
    log: &UndoLog,
    txmgr: &TransactionManager,
) -> UpdateOutcome {
    if xid == snapshot.xid {
        let mut o = UpdateOutcome::new(TmResult::SelfModified, true);
        o.next_tid = newtid;
        return o;
    }
    if txmgr.is_active(xid) {
        let mut o = UpdateOutcome::new(TmResult::BeingModified, true);
        o.next_tid = newtid;
        return o;
    }
    if txmgr.is_committed(xid) {
        let mut o = UpdateOutcome::new(TmResult::Updated, true);
        o.next_tid = newtid;
        return o;
    }

    // the deleting transaction aborted; the decision is whatever lies
    // underneath, and the new record must keep the chain
    let mut o = satisfies_update(snapshot, tid, prev, mode, log, txmgr);
    o.keep_old_undo_ptr = true;
    o
}

/// Standard row-lock conflict matrix: two modes conflict when their
/// combined strength crosses the share/exclusive line.
fn lock_conflicts(held: LockMode, requested: LockMode) -> bool {
    fn rank(m: LockMode) -> u32 {
        match m {
            LockMode::KeyShare => 0,
            LockMode::Share => 1,
            LockMode::NoKeyExclusive => 2,
            LockMode::Exclusive => 3,
        }
    }
    rank(held) + rank(requested) >= 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stronger_modes_conflict() {
        assert!(lock_conflicts(LockMode::Exclusive, LockMode::Exclusive));
        assert!(lock_conflicts(LockMode::Exclusive, LockMode::KeyShare));
        assert!(lock_conflicts(LockMode::Share, LockMode::NoKeyExclusive));
        assert!(!lock_conflicts(LockMode::Share, LockMode::Share));
        assert!(!lock_conflicts(LockMode::KeyShare, LockMode::NoKeyExclusive));
    }
}
