use log::debug;

use crate::{
    database::Database,
    mvcc::{satisfies_visibility, Snapshot, Xid},
    storage::{ColumnType, Datum, Row},
    tid::Tid,
    transaction::Transaction,
    types::EngineResult,
    utils::HandyRwLock,
};

use super::{
    attr_item::ExplodedAttrItem,
    page::TID_TREE_ATTNO,
    table::ColumnarTable,
};

/// Ordered, snapshot-visible cursor over the TID tree.
///
/// One leaf lock is held at a time, and never across a return: visible
/// tids from the current item are staged into `array` and handed out
/// from there.
pub struct TidTreeScan {
    snapshot: Snapshot,
    nexttid: Tid,
    endtid: Tid,

    /// Block hint from the previous batch; revalidated before use.
    last_block: Option<u32>,

    array: Vec<Tid>,
    array_next: usize,
    finished: bool,
}

impl TidTreeScan {
    pub fn new(snapshot: &Snapshot, start: Tid, endtid: Tid) -> Self {
        Self {
            snapshot: snapshot.clone(),
            nexttid: start,
            endtid,
            last_block: None,
            array: Vec::new(),
            array_next: 0,
            finished: false,
        }
    }

    pub fn whole_table(snapshot: &Snapshot) -> Self {
        Self::new(snapshot, Tid::MIN, Tid::MAX_PLUS_ONE)
    }

    /// Next visible tid in ascending order, or `None` at the end.
    pub fn next_tid(&mut self, table: &ColumnarTable) -> EngineResult<Option<Tid>> {
        loop {
            if self.array_next < self.array.len() {
                let tid = self.array[self.array_next];
                self.array_next += 1;
                return Ok(Some(tid));
            }

            if self.finished {
                return Ok(None);
            }

            self.load_next_batch(table)?;
        }
    }

    /// Restart or fast-forward the cursor. Rewinding drops every cache;
    /// skipping forward keeps them when it can.
    pub fn reset(&mut self, start: Tid) {
        if start < self.nexttid {
            self.array.clear();
            self.array_next = 0;
            self.last_block = None;
            self.finished = false;
            self.nexttid = start;
        } else {
            while self.array_next < self.array.len() && self.array[self.array_next] < start {
                self.array_next += 1;
            }
            if self.array_next >= self.array.len() && start > self.nexttid {
                self.nexttid = start;
            }
        }
    }

    /// Refill `array` from the next visible item at or after `nexttid`.
    fn load_next_batch(&mut self, table: &ColumnarTable) -> EngineResult<()> {
        let mut conflicts: Vec<Xid> = Vec::new();
        self.array.clear();
        self.array_next = 0;

        'pages: loop {
            if self.nexttid >= self.endtid {
                self.finished = true;
                break;
            }

            let block = match self.last_block {
                Some(block)
                    if table.page_is_expected(TID_TREE_ATTNO, self.nexttid, 0, block) =>
                {
                    block
                }
                _ => {
                    let pid = table.descend(TID_TREE_ATTNO, self.nexttid, 0)?;
                    pid.page_index
                }
            };

            let pod = Database::page_cache()
                .get_tid_leaf_page(&table.leaf_pid(TID_TREE_ATTNO, block))?;
            let leaf = pod.rl();

            if leaf.is_deleted() || leaf.hikey <= self.nexttid {
                self.last_block = None;
                continue 'pages;
            }
            self.last_block = Some(block);

            let log = Database::undo_log();
            for idx in leaf.first_item_from(self.nexttid)..leaf.items_count() {
                let item = *leaf.get_item(idx);
                if item.first_tid >= self.endtid {
                    self.finished = true;
                    break 'pages;
                }
                if item.is_dead() {
                    self.nexttid = item.end_tid();
                    continue;
                }

                let vis = satisfies_visibility(&self.snapshot, item.undo_ptr, &log);
                if let (true, Some(xid)) = (self.snapshot.is_serializable(), vis.obsoleting_xid)
                {
                    conflicts.push(xid);
                }

                if !vis.visible {
                    self.nexttid = item.end_tid();
                    continue;
                }

                // stage the visible portion of this item and stop here
                let from = self.nexttid.max(item.first_tid);
                let to = self.endtid.min(item.end_tid());
                let mut t = from;
                while t < to {
                    self.array.push(t);
                    t = t.next();
                }
                self.nexttid = item.end_tid();
                break 'pages;
            }

            // page exhausted without staging anything: hop right
            if leaf.is_rightmost() {
                self.finished = true;
                break 'pages;
            }
            self.nexttid = leaf.hikey;
            self.last_block = leaf.get_right_sibling();
        }

        // report rw-conflicts only after every lock is gone
        if !conflicts.is_empty() {
            let mut txmgr = Database::mut_transaction_manager();
            for xid in conflicts {
                txmgr.record_serializable_conflict(self.snapshot.xid, xid);
            }
        }

        Ok(())
    }
}

/// Lazily advancing cursor over one attribute tree. Owns a decompressed
/// copy of the current item; callers get datums out of it until the
/// next `next_array` replaces the backing memory.
pub struct AttrTreeScan {
    attno: u32,
    ctype: ColumnType,

    last_block: Option<u32>,
    cache: Option<ExplodedAttrItem>,
}

impl AttrTreeScan {
    pub fn new(attno: u32, ctype: ColumnType) -> Self {
        Self {
            attno,
            ctype,
            last_block: None,
            cache: None,
        }
    }

    /// The value at `tid`: `Some((datum, isnull))` when the tree has an
    /// entry, `None` when it does not (NULL, or the column default for
    /// late-added columns). Tids must be requested in ascending order
    /// unless `reset` intervenes.
    pub fn fetch_datum(
        &mut self,
        table: &ColumnarTable,
        tid: Tid,
    ) -> EngineResult<Option<(Datum, bool)>> {
        loop {
            if let Some(cache) = &self.cache {
                if cache.end_tid() > tid {
                    if cache.first_tid() > tid {
                        return Ok(None);
                    }
                    return Ok(match cache.position_of(tid) {
                        Some(pos) => {
                            Some((cache.datums[pos].clone(), cache.isnulls[pos]))
                        }
                        None => None,
                    });
                }
            }

            if !self.next_array(table, tid)? {
                return Ok(None);
            }
        }
    }

    /// Load the next item with `end_tid > tid` into the scan's array
    /// cache. False when the tree has nothing at or beyond `tid`.
    fn next_array(&mut self, table: &ColumnarTable, tid: Tid) -> EngineResult<bool> {
        let mut probe = tid;

        loop {
            let block = match self.last_block {
                Some(block) if table.page_is_expected(self.attno, probe, 0, block) => block,
                _ => {
                    let pid = table.descend(self.attno, probe, 0)?;
                    pid.page_index
                }
            };

            let pod =
                Database::page_cache().get_attr_leaf_page(&table.leaf_pid(self.attno, block))?;
            let leaf = pod.rl();

            if leaf.is_deleted() || leaf.hikey <= probe {
                self.last_block = None;
                continue;
            }
            self.last_block = Some(block);

            let idx = leaf.first_item_from(probe);
            if idx < leaf.items_count() {
                let exploded = leaf.get_item(idx).explode(self.ctype)?;
                debug!(
                    "attno {} scan cached item [{:?}, {:?})",
                    self.attno,
                    exploded.first_tid(),
                    exploded.end_tid()
                );
                self.cache = Some(exploded);
                return Ok(true);
            }

            if leaf.is_rightmost() {
                self.cache = None;
                return Ok(false);
            }

            // nothing at or past the probe here: continue at the high key
            probe = leaf.hikey;
            self.last_block = leaf.get_right_sibling();
        }
    }

    /// Rewind: drop the cached array (its memory belongs to the scan)
    /// and the block hint.
    pub fn reset(&mut self, start: Tid) {
        let stale = match &self.cache {
            Some(cache) => start < cache.first_tid(),
            None => true,
        };
        if stale {
            self.cache = None;
            self.last_block = None;
        }
    }
}

/// The executor-facing coordinator: pulls the next visible tid from the
/// TID tree, then asks each projected attribute scan for its value at
/// that tid.
pub struct TableScan<'a> {
    table: &'a ColumnarTable,
    projection: Vec<u32>,
    tid_scan: TidTreeScan,
    attr_scans: Vec<AttrTreeScan>,
}

impl<'a> TableScan<'a> {
    /// `projection`: attnos (1-based) to fetch; `None` means all
    /// columns in schema order.
    pub fn new(
        table: &'a ColumnarTable,
        tx: &Transaction,
        projection: Option<Vec<u32>>,
    ) -> Self {
        Self::with_snapshot(table, tx.get_snapshot(), projection)
    }

    pub fn with_snapshot(
        table: &'a ColumnarTable,
        snapshot: &Snapshot,
        projection: Option<Vec<u32>>,
    ) -> Self {
        let projection = projection
            .unwrap_or_else(|| (1..=table.column_count() as u32).collect());
        let attr_scans = projection
            .iter()
            .map(|attno| AttrTreeScan::new(*attno, table.column_type(*attno)))
            .collect();

        Self {
            table,
            projection,
            tid_scan: TidTreeScan::whole_table(snapshot),
            attr_scans,
        }
    }

    /// Bound the tid range, e.g. for block-wise sampling.
    pub fn set_range(&mut self, start: Tid, end: Tid) {
        self.tid_scan = TidTreeScan::new(&self.tid_scan.snapshot.clone(), start, end);
    }

    pub fn next_row(&mut self) -> EngineResult<Option<(Tid, Row)>> {
        let tid = match self.tid_scan.next_tid(self.table)? {
            Some(tid) => tid,
            None => return Ok(None),
        };

        let mut row: Row = Vec::with_capacity(self.projection.len());
        for (i, attno) in self.projection.iter().enumerate() {
            let value = self.attr_scans[i].fetch_datum(self.table, tid)?;
            row.push(resolve_value(self.table, *attno, value));
        }

        Ok(Some((tid, row)))
    }

    pub fn reset(&mut self, start: Tid) {
        self.tid_scan.reset(start);
        for scan in &mut self.attr_scans {
            scan.reset(start);
        }
    }
}

/// Absent values read as the column's add-time default (NULL when the
/// column never had one); stored NULLs stay NULL.
fn resolve_value(
    table: &ColumnarTable,
    attno: u32,
    value: Option<(Datum, bool)>,
) -> Option<Datum> {
    match value {
        Some((_, true)) => None,
        Some((datum, false)) => Some(datum),
        None => table.column_for_attno(attno).missing_default,
    }
}

impl<'a> Iterator for TableScan<'a> {
    type Item = (Tid, Row);

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().expect("table scan failed")
    }
}
