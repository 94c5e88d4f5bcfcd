use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, info};

use crate::{
    database::Database,
    error::EngineError,
    mvcc::{UndoKind, UndoPtr},
    tid::Tid,
    types::{EngineResult, SimpleResult},
    utils::HandyRwLock,
};

use super::{page::TID_TREE_ATTNO, table::ColumnarTable, tid_item::TidRunItem};

/// Memory budget for one `collect_dead_tids` round, in bytes of
/// accumulated tids. The counterpart of `maintenance_work_mem`.
pub const DEFAULT_DEAD_TIDS_BUDGET: usize = 64 * 1024;
static DEAD_TIDS_BUDGET: AtomicUsize = AtomicUsize::new(DEFAULT_DEAD_TIDS_BUDGET);

pub fn set_dead_tids_budget(bytes: usize) {
    DEAD_TIDS_BUDGET.store(bytes, Ordering::Relaxed);
}

pub fn get_dead_tids_budget() -> usize {
    DEAD_TIDS_BUDGET.load(Ordering::Relaxed)
}

const MAX_RESTARTS: usize = 64;

enum MarkAction {
    Keep,
    Dead,
}

impl ColumnarTable {
    /// Stand-in for the undo worker: turn runs whose fate is settled
    /// into dead stubs. A run dies when its deleting transaction is
    /// committed and behind the oldest-active horizon, or when its
    /// inserting transaction aborted.
    pub fn vacuum_mark_dead_pass(&self) -> EngineResult<usize> {
        let mut marked = 0usize;
        let mut next = Tid::MIN;

        loop {
            // re-descend on a stale page, but never unboundedly
            let mut step: Option<(Vec<TidRunItem>, Tid, bool)> = None;
            for _ in 0..MAX_RESTARTS {
                let pid = self.descend(TID_TREE_ATTNO, next, 0)?;
                let pod = Database::page_cache().get_tid_leaf_page(&pid)?;
                let leaf = pod.rl();

                if leaf.is_deleted() || leaf.hikey <= next {
                    continue;
                }

                let candidates: Vec<TidRunItem> = leaf
                    .items()
                    .iter()
                    .filter(|i| !i.is_dead() && i.undo_ptr.is_valid())
                    .cloned()
                    .collect();
                step = Some((candidates, leaf.hikey, leaf.is_rightmost()));
                break;
            }

            let (candidates, hikey, rightmost) = step.ok_or_else(|| {
                EngineError::corrupt(
                    TID_TREE_ATTNO,
                    next.raw(),
                    0,
                    "mark-dead walk did not converge",
                )
            })?;

            for item in candidates {
                if let MarkAction::Dead = self.settle_run(item.undo_ptr) {
                    let mut t = item.first_tid;
                    while t < item.end_tid() {
                        self.tid_mark_dead(t)?;
                        marked += 1;
                        t = t.next();
                    }
                }
            }

            if rightmost {
                break;
            }
            next = hikey;
        }

        debug!("{} mark-dead pass settled {} tids", self, marked);
        Ok(marked)
    }

    fn settle_run(&self, ptr: UndoPtr) -> MarkAction {
        let log = Database::undo_log();
        let txmgr = Database::transaction_manager();

        let record = match log.get(ptr) {
            Some(r) => r,
            None => return MarkAction::Keep,
        };

        match record.kind {
            UndoKind::Delete { .. } | UndoKind::Update { .. } => {
                if txmgr.is_all_visible(record.xid) {
                    MarkAction::Dead
                } else {
                    MarkAction::Keep
                }
            }
            UndoKind::Insert { .. } => {
                if txmgr.is_aborted(record.xid) {
                    MarkAction::Dead
                } else {
                    MarkAction::Keep
                }
            }
            UndoKind::TupleLock { .. } => MarkAction::Keep,
        }
    }

    /// Walk leaves right-link order from `start`, gathering dead tids
    /// until the memory budget is hit. Returns the set plus the next
    /// unscanned tid (`None` when the walk reached the right edge).
    pub fn collect_dead_tids(&self, start: Tid) -> EngineResult<(Vec<Tid>, Option<Tid>)> {
        let budget_entries = (get_dead_tids_budget() / 8).max(1);
        let mut dead: Vec<Tid> = Vec::new();
        let mut next = start;

        loop {
            // nothing is gathered from a page until it validated, so a
            // retried descent cannot double-collect
            let mut step: Option<(Tid, bool)> = None;
            for _ in 0..MAX_RESTARTS {
                let pid = self.descend(TID_TREE_ATTNO, next, 0)?;
                let pod = Database::page_cache().get_tid_leaf_page(&pid)?;
                let leaf = pod.rl();

                if leaf.is_deleted() || leaf.hikey <= next {
                    continue;
                }

                for idx in leaf.first_item_from(next)..leaf.items_count() {
                    let item = leaf.get_item(idx);
                    if !item.is_dead() {
                        continue;
                    }

                    let mut t = item.first_tid.max(next);
                    while t < item.end_tid() {
                        dead.push(t);
                        t = t.next();

                        if dead.len() >= budget_entries {
                            return Ok((dead, Some(t)));
                        }
                    }
                }

                step = Some((leaf.hikey, leaf.is_rightmost()));
                break;
            }

            let (hikey, rightmost) = step.ok_or_else(|| {
                EngineError::corrupt(
                    TID_TREE_ATTNO,
                    next.raw(),
                    0,
                    "dead tid collection did not converge",
                )
            })?;

            if rightmost {
                return Ok((dead, None));
            }
            next = hikey;
        }
    }

    /// Physically remove exactly `tids` (sorted) from the TID tree,
    /// unlinking leaves that end up empty.
    pub fn tid_remove(&self, tids: &[Tid]) -> SimpleResult {
        let mut i = 0;

        while i < tids.len() {
            let tid = tids[i];

            let mut advanced = false;
            for _ in 0..MAX_RESTARTS {
                let pid = self.descend(TID_TREE_ATTNO, tid, 0)?;
                let pod = Database::page_cache().get_tid_leaf_page(&pid)?;
                let mut leaf = pod.wl();

                if leaf.is_deleted() || leaf.hikey <= tid {
                    continue;
                }

                let hikey = leaf.hikey;
                let mut j = i;
                while j < tids.len() && tids[j] < hikey {
                    j += 1;
                }
                let subset = &tids[i..j];

                let mut new_items: Vec<TidRunItem> = Vec::new();
                for item in leaf.items() {
                    new_items.extend(item.remove_tids(subset));
                }

                let now_empty = new_items.is_empty();
                leaf.set_items(new_items);
                self.flush_page(&*leaf)?;

                if now_empty && !leaf.is_root() {
                    let block = pid.page_index;
                    drop(leaf);
                    self.unlink_page(TID_TREE_ATTNO, 0, block)?;
                }

                i = j;
                advanced = true;
                break;
            }

            if !advanced {
                return Err(EngineError::corrupt(
                    TID_TREE_ATTNO,
                    tid.raw(),
                    0,
                    "tid removal did not converge",
                ));
            }
        }

        Ok(())
    }

    /// Full vacuum: settle what the undo worker would have settled,
    /// then loop collect-and-remove rounds. Attribute entries go first,
    /// so an interrupted round leaves only dead tids whose values are
    /// already gone (the next round warns and carries on).
    pub fn vacuum(&self) -> EngineResult<usize> {
        self.vacuum_mark_dead_pass()?;

        let mut removed_total = 0usize;
        let mut start = Tid::MIN;

        loop {
            let (dead, next) = self.collect_dead_tids(start)?;

            if !dead.is_empty() {
                for attno in 1..=self.column_count() as u32 {
                    self.attr_remove(attno, &dead)?;
                }
                self.tid_remove(&dead)?;
                removed_total += dead.len();
            }

            match next {
                Some(n) => start = n,
                None => break,
            }
        }

        info!("{} vacuum removed {} tids", self, removed_total);
        Ok(removed_total)
    }
}
