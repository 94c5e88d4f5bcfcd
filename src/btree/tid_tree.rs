use log::{debug, warn};

use crate::{
    database::Database,
    error::EngineError,
    mvcc::{
        satisfies_update, LockMode, TmResult, UndoKind, UndoPtr, UpdateOutcome,
    },
    tid::Tid,
    transaction::Transaction,
    types::{EngineResult, SimpleResult},
    utils::HandyRwLock,
};

use super::{
    page::TID_TREE_ATTNO,
    page_cache::TidLeafPage,
    table::ColumnarTable,
    tid_item::TidRunItem,
};

const MAX_RESTARTS: usize = 64;

impl ColumnarTable {
    /// Allocate `ntuples` consecutive tids, append the run to the
    /// rightmost leaf, and emit one INSERT undo record covering it.
    /// Frozen inserts (`frozen`) skip the undo record and are visible
    /// to everyone immediately.
    pub(crate) fn tid_multi_insert(
        &self,
        tx: &Transaction,
        ntuples: u32,
        frozen: bool,
    ) -> EngineResult<Tid> {
        debug_assert!(ntuples >= 1);

        for _ in 0..MAX_RESTARTS {
            let pid = self.descend(TID_TREE_ATTNO, Tid::MAX, 0)?;
            let pod = Database::page_cache().get_tid_leaf_page(&pid)?;
            let mut leaf = pod.wl();

            if leaf.is_deleted() || !leaf.is_rightmost() {
                // a concurrent split moved the right edge from under us
                continue;
            }

            let start = match leaf.items().last() {
                Some(last) => leaf.lokey.max(last.end_tid()),
                None => leaf.lokey,
            };
            let end = start.advance(ntuples as u64);
            if !end.prev().is_valid() {
                return Err(EngineError::resource("tid space exhausted"));
            }

            let undo_ptr = if frozen {
                UndoPtr::INVALID
            } else {
                tx.emit_undo(
                    self.get_id(),
                    UndoPtr::INVALID,
                    UndoKind::Insert {
                        tid: start,
                        endtid: end,
                        speculative_token: 0,
                    },
                )
            };

            let item = TidRunItem::new(start, ntuples, undo_ptr, 0);
            if leaf.fits(TidRunItem::DISK_SIZE) {
                leaf.append_item(item);
                self.flush_page(&*leaf)?;
            } else {
                let mut items = leaf.clone_items();
                items.push(item);
                let items = merge_tid_runs(items);
                self.repack_leaf(TID_TREE_ATTNO, &mut *leaf, items)?;
            }

            debug!(
                "{} allocated tids [{:?}, {:?}) for {}",
                self, start, end, tx
            );
            return Ok(start);
        }

        Err(EngineError::invariant("tid insert did not converge"))
    }

    /// Delete `tid` on behalf of `tx`. Visibility conflicts come back
    /// as a `TmResult`, not an error; a missing or dead tid is fatal.
    pub(crate) fn tid_delete(&self, tx: &Transaction, tid: Tid) -> EngineResult<TmResult> {
        for _ in 0..MAX_RESTARTS {
            let pid = self.descend(TID_TREE_ATTNO, tid, 0)?;
            let pod = Database::page_cache().get_tid_leaf_page(&pid)?;
            let mut leaf = pod.wl();

            if leaf.is_deleted() || leaf.hikey <= tid {
                continue;
            }

            let idx = leaf.find_covering(tid).ok_or_else(|| {
                EngineError::corrupt(
                    TID_TREE_ATTNO,
                    tid.raw(),
                    pid.page_index,
                    "delete of unknown tid",
                )
            })?;
            let item = *leaf.get_item(idx);
            if item.is_dead() {
                return Err(EngineError::corrupt(
                    TID_TREE_ATTNO,
                    tid.raw(),
                    pid.page_index,
                    "delete hit a dead tid",
                ));
            }

            let outcome = self.check_update(tx, tid, item.undo_ptr, LockMode::Exclusive);
            if outcome.result != TmResult::Ok {
                return Ok(outcome.result);
            }

            let prev = if outcome.keep_old_undo_ptr {
                item.undo_ptr
            } else {
                UndoPtr::INVALID
            };
            let ptr = tx.emit_undo(
                self.get_id(),
                prev,
                UndoKind::Delete {
                    tid,
                    changed_part: false,
                },
            );

            let replacement = TidRunItem::new(tid, 1, ptr, 0);
            self.replace_tid_slice(&mut *leaf, idx, tid, Some(replacement))?;
            return Ok(TmResult::Ok);
        }

        Err(EngineError::invariant("tid delete did not converge"))
    }

    /// Step 1 of update: run the visibility check that a delete would
    /// run, without writing anything yet.
    pub(crate) fn tid_lock_old(
        &self,
        tx: &Transaction,
        tid: Tid,
    ) -> EngineResult<UpdateOutcome> {
        for _ in 0..MAX_RESTARTS {
            let pid = self.descend(TID_TREE_ATTNO, tid, 0)?;
            let pod = Database::page_cache().get_tid_leaf_page(&pid)?;
            let leaf = pod.rl();

            if leaf.is_deleted() || leaf.hikey <= tid {
                continue;
            }

            let idx = leaf.find_covering(tid).ok_or_else(|| {
                EngineError::corrupt(
                    TID_TREE_ATTNO,
                    tid.raw(),
                    pid.page_index,
                    "update of unknown tid",
                )
            })?;
            let item = *leaf.get_item(idx);
            if item.is_dead() {
                return Err(EngineError::corrupt(
                    TID_TREE_ATTNO,
                    tid.raw(),
                    pid.page_index,
                    "update hit a dead tid",
                ));
            }

            return Ok(self.check_update(tx, tid, item.undo_ptr, LockMode::Exclusive));
        }

        Err(EngineError::invariant("tid lock-old did not converge"))
    }

    /// Step 3 of update: stamp the old tid with an UPDATE undo record
    /// pointing at `newtid`. The leaf was unlocked since step 1, so
    /// visibility is re-validated from scratch; a concurrent change is
    /// reported back instead of being silently overwritten.
    pub(crate) fn tid_mark_old_updated(
        &self,
        tx: &Transaction,
        otid: Tid,
        newtid: Tid,
        key_update: bool,
    ) -> EngineResult<TmResult> {
        for _ in 0..MAX_RESTARTS {
            let pid = self.descend(TID_TREE_ATTNO, otid, 0)?;
            let pod = Database::page_cache().get_tid_leaf_page(&pid)?;
            let mut leaf = pod.wl();

            if leaf.is_deleted() || leaf.hikey <= otid {
                continue;
            }

            let idx = leaf.find_covering(otid).ok_or_else(|| {
                EngineError::corrupt(
                    TID_TREE_ATTNO,
                    otid.raw(),
                    pid.page_index,
                    "updated tid disappeared between lock and mark",
                )
            })?;
            let item = *leaf.get_item(idx);
            if item.is_dead() {
                return Err(EngineError::corrupt(
                    TID_TREE_ATTNO,
                    otid.raw(),
                    pid.page_index,
                    "updated tid went dead between lock and mark",
                ));
            }

            let outcome = self.check_update(tx, otid, item.undo_ptr, LockMode::Exclusive);
            if outcome.result != TmResult::Ok {
                debug!(
                    "update of {:?} lost the race between lock and mark: {:?}",
                    otid, outcome.result
                );
                return Ok(outcome.result);
            }

            let prev = if outcome.keep_old_undo_ptr {
                item.undo_ptr
            } else {
                UndoPtr::INVALID
            };
            let ptr = tx.emit_undo(
                self.get_id(),
                prev,
                UndoKind::Update {
                    tid: otid,
                    newtid,
                    key_update,
                },
            );

            let replacement = TidRunItem::new(otid, 1, ptr, 0);
            self.replace_tid_slice(&mut *leaf, idx, otid, Some(replacement))?;
            return Ok(TmResult::Ok);
        }

        Err(EngineError::invariant("tid mark-updated did not converge"))
    }

    /// Row-level lock: same shape as delete, but the item keeps its
    /// value and flags; only the undo pointer moves.
    pub(crate) fn tid_lock_tuple(
        &self,
        tx: &Transaction,
        tid: Tid,
        mode: LockMode,
    ) -> EngineResult<TmResult> {
        for _ in 0..MAX_RESTARTS {
            let pid = self.descend(TID_TREE_ATTNO, tid, 0)?;
            let pod = Database::page_cache().get_tid_leaf_page(&pid)?;
            let mut leaf = pod.wl();

            if leaf.is_deleted() || leaf.hikey <= tid {
                continue;
            }

            let idx = leaf.find_covering(tid).ok_or_else(|| {
                EngineError::corrupt(
                    TID_TREE_ATTNO,
                    tid.raw(),
                    pid.page_index,
                    "lock of unknown tid",
                )
            })?;
            let item = *leaf.get_item(idx);
            if item.is_dead() {
                return Err(EngineError::corrupt(
                    TID_TREE_ATTNO,
                    tid.raw(),
                    pid.page_index,
                    "lock hit a dead tid",
                ));
            }

            let outcome = self.check_update(tx, tid, item.undo_ptr, mode);
            if outcome.result != TmResult::Ok && outcome.result != TmResult::SelfModified {
                return Ok(outcome.result);
            }

            let prev = if outcome.keep_old_undo_ptr {
                item.undo_ptr
            } else {
                UndoPtr::INVALID
            };
            let ptr = tx.emit_undo(self.get_id(), prev, UndoKind::TupleLock { tid, mode });

            let replacement = TidRunItem::new(tid, 1, ptr, item.flags);
            self.replace_tid_slice(&mut *leaf, idx, tid, Some(replacement))?;
            return Ok(TmResult::Ok);
        }

        Err(EngineError::invariant("tid lock did not converge"))
    }

    /// Undo-worker entry: once the deleting transaction is committed
    /// and aged out (or the inserting one aborted), the tid becomes a
    /// dead stub for vacuum. Idempotent.
    pub fn tid_mark_dead(&self, tid: Tid) -> SimpleResult {
        for _ in 0..MAX_RESTARTS {
            let pid = self.descend(TID_TREE_ATTNO, tid, 0)?;
            let pod = Database::page_cache().get_tid_leaf_page(&pid)?;
            let mut leaf = pod.wl();

            if leaf.is_deleted() || leaf.hikey <= tid {
                continue;
            }

            let idx = match leaf.find_covering(tid) {
                Some(idx) => idx,
                None => {
                    // vacuum got here first
                    debug!("mark-dead of {:?}: already removed", tid);
                    return Ok(());
                }
            };
            let item = *leaf.get_item(idx);
            if item.is_dead() && item.nelements == 1 && item.first_tid == tid {
                return Ok(());
            }

            self.replace_tid_slice(&mut *leaf, idx, tid, Some(TidRunItem::dead(tid)))?;
            return Ok(());
        }

        Err(EngineError::invariant("mark-dead did not converge"))
    }

    /// Undo-apply after abort: back out a delete/lock if, and only if,
    /// the item still points at the record being undone. A newer
    /// pointer means a later operation superseded it.
    pub fn tid_undo_deletion(&self, tid: Tid, undone: UndoPtr) -> SimpleResult {
        for _ in 0..MAX_RESTARTS {
            let pid = self.descend(TID_TREE_ATTNO, tid, 0)?;
            let pod = Database::page_cache().get_tid_leaf_page(&pid)?;
            let mut leaf = pod.wl();

            if leaf.is_deleted() || leaf.hikey <= tid {
                continue;
            }

            let idx = match leaf.find_covering(tid) {
                Some(idx) => idx,
                None => {
                    warn!("undo-deletion of {:?}: tid is gone", tid);
                    return Ok(());
                }
            };
            let item = *leaf.get_item(idx);
            if item.undo_ptr != undone {
                debug!(
                    "undo-deletion of {:?}: pointer moved on ({:?} != {:?})",
                    tid, item.undo_ptr, undone
                );
                return Ok(());
            }

            let restored = TidRunItem::new(tid, 1, UndoPtr::INVALID, item.flags);
            self.replace_tid_slice(&mut *leaf, idx, tid, Some(restored))?;
            return Ok(());
        }

        Err(EngineError::invariant("undo-deletion did not converge"))
    }

    /// The split-aware single-tid replace: slice the covering run into
    /// `[before | replacement | after]`, in place when the delta fits,
    /// through the repacker otherwise.
    pub(crate) fn replace_tid_slice(
        &self,
        leaf: &mut TidLeafPage,
        idx: usize,
        tid: Tid,
        replacement: Option<TidRunItem>,
    ) -> SimpleResult {
        let item = *leaf.get_item(idx);
        let slices = item.slice_around(tid, replacement);

        let new_bytes = slices.len() * TidRunItem::DISK_SIZE;
        let fits =
            leaf.used_space() - TidRunItem::DISK_SIZE + new_bytes <= TidLeafPage::capacity();

        if fits {
            leaf.splice_item(idx, slices);
            self.flush_page(&*leaf)
        } else {
            let mut items = leaf.clone_items();
            items.splice(idx..idx + 1, slices).for_each(drop);
            let items = merge_tid_runs(items);
            self.repack_leaf(TID_TREE_ATTNO, leaf, items)
        }
    }

    fn check_update(
        &self,
        tx: &Transaction,
        tid: Tid,
        ptr: UndoPtr,
        mode: LockMode,
    ) -> UpdateOutcome {
        let log = Database::undo_log();
        let txmgr = Database::transaction_manager();
        satisfies_update(tx.get_snapshot(), tid, ptr, mode, &log, &txmgr)
    }
}

/// Fuse adjacent runs with identical undo state; bulk loads otherwise
/// leave a trail of mergeable fragments behind every repack.
pub(crate) fn merge_tid_runs(items: Vec<TidRunItem>) -> Vec<TidRunItem> {
    let mut out: Vec<TidRunItem> = Vec::with_capacity(items.len());
    for item in items {
        match out.last_mut() {
            Some(last) if last.can_merge(&item) => {
                last.nelements += item.nelements;
            }
            _ => out.push(item),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjacent_same_state_runs_merge() {
        let a = TidRunItem::new(Tid::new(1).unwrap(), 3, UndoPtr::INVALID, 0);
        let b = TidRunItem::new(Tid::new(4).unwrap(), 2, UndoPtr::INVALID, 0);
        let c = TidRunItem::new(Tid::new(6).unwrap(), 1, UndoPtr::from_raw(5), 0);

        let merged = merge_tid_runs(vec![a, b, c]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].nelements, 5);
    }

    #[test]
    fn gap_blocks_merge() {
        let a = TidRunItem::new(Tid::new(1).unwrap(), 3, UndoPtr::INVALID, 0);
        let b = TidRunItem::new(Tid::new(5).unwrap(), 2, UndoPtr::INVALID, 0);
        assert_eq!(merge_tid_runs(vec![a, b]).len(), 2);
    }
}
