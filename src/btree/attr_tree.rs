use std::collections::VecDeque;

use log::{debug, warn};

use crate::{
    database::Database,
    error::EngineError,
    storage::{ColumnChunk, ColumnType},
    tid::Tid,
    types::{EngineResult, SimpleResult},
    utils::HandyRwLock,
};

use super::{
    attr_item::{AttrItem, ExplodedAttrItem},
    page::ArrayItem,
    page_cache::AttrLeafPage,
    table::ColumnarTable,
};

const MAX_RESTARTS: usize = 64;

/// Cap on a single attribute item, so several items share a page and
/// splitting stays item-granular.
fn max_attr_item_bytes() -> usize {
    (AttrLeafPage::capacity() - 2) / 4
}

impl ColumnarTable {
    /// Insert one column's values for freshly allocated tids. The
    /// caller provides ascending tids; values are carved into items and
    /// handed to the overlap-resolving add path.
    pub(crate) fn attr_multi_insert(&self, attno: u32, chunk: &ColumnChunk) -> SimpleResult {
        debug_assert!(chunk.tids.len() == chunk.datums.len());
        debug_assert!(chunk.tids.len() == chunk.isnulls.len());
        if chunk.tids.is_empty() {
            return Ok(());
        }

        let limit = max_attr_item_bytes();
        let mut items: Vec<ExplodedAttrItem> = Vec::new();

        let mut tids = Vec::new();
        let mut datums = Vec::new();
        let mut isnulls = Vec::new();
        let mut bytes = 0usize;

        for i in 0..chunk.tids.len() {
            let entry_bytes = 9 + if chunk.isnulls[i] {
                0
            } else {
                chunk.datums[i].disk_size()
            };
            if !tids.is_empty() && bytes + entry_bytes > limit {
                items.push(ExplodedAttrItem::new(
                    std::mem::replace(&mut tids, Vec::new()),
                    std::mem::replace(&mut datums, Vec::new()),
                    std::mem::replace(&mut isnulls, Vec::new()),
                ));
                bytes = 0;
            }
            tids.push(chunk.tids[i]);
            datums.push(chunk.datums[i].clone());
            isnulls.push(chunk.isnulls[i]);
            bytes += entry_bytes;
        }
        items.push(ExplodedAttrItem::new(tids, datums, isnulls));

        self.attr_add_items(attno, items)
    }

    /// Place new items into the tree, resolving collisions with
    /// existing on-page items in lockstep. Items crossing a leaf
    /// boundary are split at the high key and carried to the right
    /// sibling; if the target page moved under us we retry the descent
    /// from the root.
    pub(crate) fn attr_add_items(
        &self,
        attno: u32,
        new_items: Vec<ExplodedAttrItem>,
    ) -> SimpleResult {
        let ctype = self.column_type(attno);
        let mut queue: VecDeque<ExplodedAttrItem> = new_items.into();

        while !queue.is_empty() {
            let first = queue.front().map(|i| i.first_tid()).unwrap();

            let mut placed = false;
            for _ in 0..MAX_RESTARTS {
                let pid = self.descend(attno, first, 0)?;
                let pod = Database::page_cache().get_attr_leaf_page(&pid)?;
                let mut leaf = pod.wl();

                if leaf.is_deleted() || leaf.hikey <= first {
                    continue;
                }

                let hikey = leaf.hikey;
                let mut batch: Vec<ExplodedAttrItem> = Vec::new();
                while let Some(item) = queue.pop_front() {
                    if item.first_tid() >= hikey {
                        queue.push_front(item);
                        break;
                    }
                    if item.end_tid() <= hikey {
                        batch.push(item);
                        continue;
                    }
                    // item straddles the boundary: keep the left part
                    let (left, right) = item.split_at(hikey);
                    if let Some(left) = left {
                        batch.push(left);
                    }
                    if let Some(right) = right {
                        queue.push_front(right);
                    }
                    break;
                }

                let merged = merge_attr_items(leaf.clone_items(), batch, ctype)?;
                let total: usize = merged.iter().map(|i| i.disk_size()).sum();
                if total + 2 <= AttrLeafPage::capacity() {
                    leaf.set_items(merged);
                    self.flush_page(&*leaf)?;
                } else {
                    self.attr_repack(attno, &mut *leaf, merged)?;
                }

                placed = true;
                break;
            }

            if !placed {
                return Err(EngineError::corrupt(
                    attno,
                    first.raw(),
                    0,
                    "attribute insert did not converge",
                ));
            }
        }

        Ok(())
    }

    /// Repack an attribute leaf: fuse adjacent small items first (the
    /// pack step re-attempts compression), then hand to the generic
    /// leaf repacker.
    pub(crate) fn attr_repack(
        &self,
        attno: u32,
        leaf: &mut AttrLeafPage,
        items: Vec<AttrItem>,
    ) -> SimpleResult {
        let ctype = self.column_type(attno);
        let items = merge_small_attr_items(items, ctype)?;
        self.repack_leaf(attno, leaf, items)
    }

    /// Vacuum: drop every entry for `dead` (sorted) from this tree.
    /// Emptied leaves are unlinked.
    pub(crate) fn attr_remove(&self, attno: u32, dead: &[Tid]) -> SimpleResult {
        let ctype = self.column_type(attno);
        let mut i = 0;

        while i < dead.len() {
            let tid = dead[i];

            let mut advanced = false;
            for _ in 0..MAX_RESTARTS {
                let pid = self.descend(attno, tid, 0)?;
                let pod = Database::page_cache().get_attr_leaf_page(&pid)?;
                let mut leaf = pod.wl();

                if leaf.is_deleted() || leaf.hikey <= tid {
                    continue;
                }

                let hikey = leaf.hikey;
                let mut j = i;
                while j < dead.len() && dead[j] < hikey {
                    j += 1;
                }
                let subset = &dead[i..j];

                let mut new_items: Vec<AttrItem> = Vec::new();
                let mut removed = 0usize;
                let mut changed = false;

                for item in leaf.items() {
                    if !overlaps(item, subset) {
                        new_items.push(item.clone());
                        continue;
                    }

                    changed = true;
                    let exploded = item.explode(ctype)?;
                    let before = exploded.len();
                    match exploded.remove_tids(subset) {
                        Some(rest) => {
                            removed += before - rest.len();
                            new_items.push(AttrItem::Packed(rest.pack()));
                        }
                        None => {
                            removed += before;
                        }
                    }
                }

                if removed < subset.len() {
                    // a prior aborted vacuum already took some of these
                    warn!(
                        "vacuum: {} of {} dead tids had no value in attno {}",
                        subset.len() - removed,
                        subset.len(),
                        attno
                    );
                }

                if changed {
                    let now_empty = new_items.is_empty();
                    leaf.set_items(new_items);
                    self.flush_page(&*leaf)?;

                    if now_empty && !leaf.is_root() {
                        let block = pid.page_index;
                        drop(leaf);
                        self.unlink_page(attno, 0, block)?;
                    }
                }

                i = j;
                advanced = true;
                break;
            }

            if !advanced {
                return Err(EngineError::corrupt(
                    attno,
                    tid.raw(),
                    0,
                    "attribute vacuum did not converge",
                ));
            }
        }

        Ok(())
    }
}

fn overlaps(item: &AttrItem, sorted: &[Tid]) -> bool {
    let first = item.first_tid();
    let end = item.end_tid();
    let idx = sorted.partition_point(|t| *t < first);
    idx < sorted.len() && sorted[idx] < end
}

/// The five-case lockstep merge of existing page items with incoming
/// ones. Both sequences are ordered and internally non-overlapping; a
/// tid present on both sides is a fatal duplicate.
pub(crate) fn merge_attr_items(
    old_items: Vec<AttrItem>,
    new_items: Vec<ExplodedAttrItem>,
    ctype: ColumnType,
) -> EngineResult<Vec<AttrItem>> {
    let mut old: VecDeque<AttrItem> = old_items.into();
    let mut new: VecDeque<ExplodedAttrItem> = new_items.into();
    let mut out: Vec<AttrItem> = Vec::new();

    loop {
        if new.is_empty() {
            out.extend(old.drain(..));
            break;
        }
        if old.is_empty() {
            out.extend(new.drain(..).map(|e| AttrItem::Packed(e.pack())));
            break;
        }

        let (of, oe) = {
            let o = old.front().unwrap();
            (o.first_tid(), o.end_tid())
        };
        let (nf, ne) = {
            let n = new.front().unwrap();
            (n.first_tid(), n.end_tid())
        };

        if ne <= of {
            let n = new.pop_front().unwrap();
            out.push(AttrItem::Packed(n.pack()));
        } else if oe <= nf {
            out.push(old.pop_front().unwrap());
        } else if nf == of {
            return Err(EngineError::invariant(&format!(
                "attribute already has a value at tid {:?}",
                nf
            )));
        } else if nf < of {
            // the new item overhangs on the left: emit that part
            let n = new.pop_front().unwrap();
            let (left, right) = n.split_at(of);
            if let Some(left) = left {
                out.push(AttrItem::Packed(left.pack()));
            }
            if let Some(right) = right {
                new.push_front(right);
            }
        } else {
            // the old item overhangs on the left: emit that part
            let o = old.pop_front().unwrap();
            let exploded = o.explode(ctype)?;
            let (left, right) = exploded.split_at(nf);
            if let Some(left) = left {
                out.push(AttrItem::Packed(left.pack()));
            }
            if let Some(right) = right {
                old.push_front(AttrItem::Exploded(right));
            }
        }
    }

    // pages only store packed items
    Ok(out.iter().map(|i| i.to_packed()).collect())
}

/// Fuse runs of small neighbouring items so a page does not silt up
/// with fragments; packing the fusion re-attempts compression.
fn merge_small_attr_items(items: Vec<AttrItem>, ctype: ColumnType) -> EngineResult<Vec<AttrItem>> {
    let limit = max_attr_item_bytes();
    let mut out: Vec<AttrItem> = Vec::new();

    for item in items {
        let fuse = match out.last() {
            Some(last) => last.disk_size() + item.disk_size() <= limit,
            None => false,
        };

        if fuse {
            let last = out.pop().unwrap();
            let mut combined = last.explode(ctype)?;
            combined.append(&item.explode(ctype)?);
            out.push(AttrItem::Packed(combined.pack()));
        } else {
            out.push(item.to_packed());
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Datum;

    fn exploded(tids: &[u64]) -> ExplodedAttrItem {
        ExplodedAttrItem::new(
            tids.iter().map(|v| Tid::new(*v).unwrap()).collect(),
            tids.iter().map(|v| Datum::Int(*v as i64)).collect(),
            vec![false; tids.len()],
        )
    }

    fn tids_of(items: &[AttrItem]) -> Vec<u64> {
        let mut out = Vec::new();
        for i in items {
            let e = i.explode(ColumnType::Int).unwrap();
            out.extend(e.tids.iter().map(|t| t.raw()));
        }
        out
    }

    #[test]
    fn disjoint_items_interleave() {
        let old = vec![AttrItem::Exploded(exploded(&[5, 6])).to_packed()];
        let new = vec![exploded(&[1, 2]), exploded(&[9, 10])];

        let merged = merge_attr_items(old, new, ColumnType::Int).unwrap();
        assert_eq!(tids_of(&merged), vec![1, 2, 5, 6, 9, 10]);
    }

    #[test]
    fn interleaved_ranges_split() {
        // old covers [10, 20), new fills the gap [12, 14)
        let old = vec![AttrItem::Exploded(exploded(&[10, 11, 15, 19])).to_packed()];
        let new = vec![exploded(&[12, 13])];

        let merged = merge_attr_items(old, new, ColumnType::Int).unwrap();
        assert_eq!(tids_of(&merged), vec![10, 11, 12, 13, 15, 19]);
    }

    #[test]
    fn duplicate_tid_is_fatal() {
        let old = vec![AttrItem::Exploded(exploded(&[5, 6])).to_packed()];
        let new = vec![exploded(&[6, 7])];
        assert!(merge_attr_items(old, new, ColumnType::Int).is_err());
    }

    #[test]
    fn values_survive_the_merge() {
        let old = vec![AttrItem::Exploded(exploded(&[100])).to_packed()];
        let new = vec![exploded(&[50])];

        let merged = merge_attr_items(old, new, ColumnType::Int).unwrap();
        let all: Vec<(u64, i64)> = merged
            .iter()
            .flat_map(|i| {
                let e = i.explode(ColumnType::Int).unwrap();
                e.tids
                    .iter()
                    .zip(e.datums.iter())
                    .map(|(t, d)| (t.raw(), d.get_int()))
                    .collect::<Vec<_>>()
            })
            .collect();
        assert_eq!(all, vec![(50, 50), (100, 100)]);
    }
}
