use log::debug;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    database::Database,
    error::EngineError,
    mvcc::{LockMode, TmResult},
    storage::{ColumnChunk, Datum, Row},
    tid::Tid,
    transaction::Transaction,
    types::EngineResult,
    utils::HandyRwLock,
};

use super::{
    page::TID_TREE_ATTNO,
    scan::{AttrTreeScan, TableScan, TidTreeScan},
    table::ColumnarTable,
};

/// What ANALYZE hands the planner.
#[derive(Debug, Clone)]
pub struct TableStats {
    pub row_count: usize,
    pub pages: usize,

    /// Estimated NULL fraction per column, sample-derived.
    pub null_frac: Vec<f64>,
}

impl ColumnarTable {
    /// Insert one row; returns its tid.
    pub fn insert_row(&self, tx: &Transaction, row: &Row) -> EngineResult<Tid> {
        Ok(self.multi_insert_rows(tx, std::slice::from_ref(row))?[0])
    }

    /// Insert a batch of rows with consecutive tids: one run in the TID
    /// tree, one chunk per attribute tree.
    pub fn multi_insert_rows(&self, tx: &Transaction, rows: &[Row]) -> EngineResult<Vec<Tid>> {
        self.multi_insert_internal(tx, rows, false)
    }

    /// Bulk-load variant: no undo records, rows are born frozen.
    pub fn multi_insert_frozen(&self, tx: &Transaction, rows: &[Row]) -> EngineResult<Vec<Tid>> {
        self.multi_insert_internal(tx, rows, true)
    }

    fn multi_insert_internal(
        &self,
        tx: &Transaction,
        rows: &[Row],
        frozen: bool,
    ) -> EngineResult<Vec<Tid>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let columns = self.column_count();
        for row in rows {
            if row.len() != columns {
                return Err(EngineError::input(&format!(
                    "row has {} values, table has {} columns",
                    row.len(),
                    columns
                )));
            }
        }

        let first = self.tid_multi_insert(tx, rows.len() as u32, frozen)?;
        let tids: Vec<Tid> = (0..rows.len() as u64).map(|i| first.advance(i)).collect();

        for col in 0..columns {
            let attno = col as u32 + 1;
            let ctype = self.column_type(attno);

            let chunk = ColumnChunk {
                tids: tids.clone(),
                datums: rows
                    .iter()
                    .map(|r| {
                        r[col]
                            .clone()
                            .unwrap_or_else(|| Datum::null_placeholder(ctype))
                    })
                    .collect(),
                isnulls: rows.iter().map(|r| r[col].is_none()).collect(),
            };
            self.attr_multi_insert(attno, &chunk)?;
        }

        Ok(tids)
    }

    /// MVCC delete. `TmResult::Ok` on success; visibility conflicts are
    /// answers, not errors.
    pub fn delete_row(&self, tx: &Transaction, tid: Tid) -> EngineResult<TmResult> {
        self.tid_delete(tx, tid)
    }

    /// MVCC update: lock the old row, insert the new version, stamp the
    /// old tid with the forwarding undo record. When a concurrent
    /// writer wins between the lock and the stamp, the freshly inserted
    /// tid is marked dead and the conflict is reported back.
    pub fn update_row(
        &self,
        tx: &Transaction,
        otid: Tid,
        row: &Row,
    ) -> EngineResult<(TmResult, Option<Tid>)> {
        // step 1: check, without writing
        let outcome = self.tid_lock_old(tx, otid)?;
        if outcome.result != TmResult::Ok {
            return Ok((outcome.result, outcome.next_tid));
        }

        // step 2: the new version is a plain insert
        let newtid = self.multi_insert_rows(tx, std::slice::from_ref(row))?[0];

        // step 3: re-validate and stamp
        let result = self.tid_mark_old_updated(tx, otid, newtid, false)?;
        if result != TmResult::Ok {
            debug!(
                "update of {:?} rolled back its new version {:?}",
                otid, newtid
            );
            self.tid_mark_dead(newtid)?;
            return Ok((result, None));
        }

        Ok((TmResult::Ok, Some(newtid)))
    }

    /// Row-level lock, `SELECT ... FOR UPDATE` and friends.
    pub fn lock_row(
        &self,
        tx: &Transaction,
        tid: Tid,
        mode: LockMode,
    ) -> EngineResult<TmResult> {
        self.tid_lock_tuple(tx, tid, mode)
    }

    /// Index-fetch one row by tid. `None` when the tid is absent, dead,
    /// or invisible to the snapshot.
    pub fn fetch_row(&self, tx: &Transaction, tid: Tid) -> EngineResult<Option<Row>> {
        if !self.tid_is_visible(tx, tid)? {
            return Ok(None);
        }

        let mut row: Row = Vec::with_capacity(self.column_count());
        for col in 0..self.column_count() {
            let attno = col as u32 + 1;
            let mut scan = AttrTreeScan::new(attno, self.column_type(attno));
            let value = scan.fetch_datum(self, tid)?;
            row.push(match value {
                Some((_, true)) => None,
                Some((datum, false)) => Some(datum),
                None => self.column_for_attno(attno).missing_default,
            });
        }
        Ok(Some(row))
    }

    /// Bitmap-style fetch: visible rows for a sorted tid set, sharing
    /// one set of lazily advancing attribute cursors.
    pub fn fetch_rows(&self, tx: &Transaction, tids: &[Tid]) -> EngineResult<Vec<(Tid, Row)>> {
        debug_assert!(tids.windows(2).all(|w| w[0] < w[1]));

        let columns = self.column_count();
        let mut scans: Vec<AttrTreeScan> = (1..=columns as u32)
            .map(|attno| AttrTreeScan::new(attno, self.column_type(attno)))
            .collect();

        let mut out = Vec::new();
        for tid in tids {
            if !self.tid_is_visible(tx, *tid)? {
                continue;
            }
            let mut row: Row = Vec::with_capacity(columns);
            for (col, scan) in scans.iter_mut().enumerate() {
                let attno = col as u32 + 1;
                let value = scan.fetch_datum(self, *tid)?;
                row.push(match value {
                    Some((_, true)) => None,
                    Some((datum, false)) => Some(datum),
                    None => self.column_for_attno(attno).missing_default,
                });
            }
            out.push((*tid, row));
        }
        Ok(out)
    }

    fn tid_is_visible(&self, tx: &Transaction, tid: Tid) -> EngineResult<bool> {
        let mut scan = TidTreeScan::new(tx.get_snapshot(), tid, tid.next());
        Ok(scan.next_tid(self)? == Some(tid))
    }

    /// Ordered snapshot scan over all columns (or a projection of
    /// attnos).
    pub fn scan<'a>(&'a self, tx: &Transaction, projection: Option<Vec<u32>>) -> TableScan<'a> {
        TableScan::new(self, tx, projection)
    }

    /// `TABLESAMPLE SYSTEM(percent) REPEATABLE(seed)`: choose whole tid
    /// blocks, return every visible row in the chosen blocks.
    pub fn sample_scan_system(
        &self,
        tx: &Transaction,
        percent: f64,
        seed: u64,
    ) -> EngineResult<Vec<(Tid, Row)>> {
        let fraction = (percent / 100.0).max(0.0).min(1.0);
        let mut rng = StdRng::seed_from_u64(seed);

        let max_block = match self.last_assigned_tid()? {
            Some(last) => last.block(),
            None => return Ok(Vec::new()),
        };
        let chosen: Vec<bool> = (0..=max_block).map(|_| rng.gen::<f64>() < fraction).collect();

        let mut out = Vec::new();
        let mut scan = TableScan::new(self, tx, None);
        while let Some((tid, row)) = scan.next_row()? {
            if chosen[tid.block() as usize] {
                out.push((tid, row));
            }
        }
        Ok(out)
    }

    /// `TABLESAMPLE BERNOULLI(percent) REPEATABLE(seed)`: an
    /// independent coin flip per visible tuple, across every block.
    pub fn sample_scan_bernoulli(
        &self,
        tx: &Transaction,
        percent: f64,
        seed: u64,
    ) -> EngineResult<Vec<(Tid, Row)>> {
        let fraction = (percent / 100.0).max(0.0).min(1.0);
        let mut rng = StdRng::seed_from_u64(seed);

        let mut out = Vec::new();
        let mut scan = TableScan::new(self, tx, None);
        while let Some((tid, row)) = scan.next_row()? {
            if rng.gen::<f64>() < fraction {
                out.push((tid, row));
            }
        }
        Ok(out)
    }

    /// ANALYZE: visible row count plus per-column null fractions from
    /// a seeded Bernoulli sample.
    pub fn analyze(
        &self,
        tx: &Transaction,
        sample_percent: f64,
        seed: u64,
    ) -> EngineResult<TableStats> {
        let sampled = self.sample_scan_bernoulli(tx, sample_percent, seed)?;

        let columns = self.column_count();
        let mut nulls = vec![0usize; columns];
        for (_, row) in &sampled {
            for (col, value) in row.iter().enumerate() {
                if value.is_none() {
                    nulls[col] += 1;
                }
            }
        }

        let denom = sampled.len().max(1) as f64;
        Ok(TableStats {
            row_count: self.visible_count(tx)?,
            pages: self.pages_count(),
            null_frac: nulls.iter().map(|n| *n as f64 / denom).collect(),
        })
    }

    /// Highest tid handed out so far, dead or alive.
    pub fn last_assigned_tid(&self) -> EngineResult<Option<Tid>> {
        let pid = self.descend(TID_TREE_ATTNO, Tid::MAX, 0)?;
        let pod = Database::page_cache().get_tid_leaf_page(&pid)?;
        let leaf = pod.rl();
        Ok(leaf.items().last().map(|i| i.end_tid().prev()))
    }

    /// Count the rows a snapshot sees; a scan that throws nothing away.
    pub fn visible_count(&self, tx: &Transaction) -> EngineResult<usize> {
        let mut scan = TidTreeScan::whole_table(tx.get_snapshot());
        let mut n = 0;
        while scan.next_tid(self)?.is_some() {
            n += 1;
        }
        Ok(n)
    }
}
