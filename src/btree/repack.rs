use log::debug;

use crate::{
    error::EngineError,
    tid::Tid,
    types::SimpleResult,
};

use super::{
    page::{ArrayItem, BTreeLeafPage, Downlink},
    page_cache::{PageCache, PageStore},
    split::SplitStack,
    table::ColumnarTable,
};

const ITEM_COUNT_HEADER: usize = 2;

impl ColumnarTable {
    /// Rewrite a leaf's contents as `items`, splitting into a chain of
    /// new pages when they no longer fit. `orig` is the exclusively
    /// locked original leaf; it stays the leftmost page of the result.
    ///
    /// Split sizing: a rightmost leaf packs the early pages to ~90% and
    /// leaves the tail page mostly empty for future appends; any other
    /// leaf spreads the bytes evenly.
    pub(crate) fn repack_leaf<I: ArrayItem>(
        &self,
        attno: u32,
        orig: &mut BTreeLeafPage<I>,
        items: Vec<I>,
    ) -> SimpleResult
    where
        PageCache: PageStore<BTreeLeafPage<I>>,
    {
        let budget = BTreeLeafPage::<I>::capacity() - ITEM_COUNT_HEADER;
        let total: usize = items.iter().map(|i| i.disk_size()).sum();

        if let Some(fat) = items.iter().find(|i| i.disk_size() > budget) {
            return Err(EngineError::corrupt(
                attno,
                fat.first_tid().raw(),
                orig.get_pid().page_index,
                "item larger than a page",
            ));
        }

        if total <= budget {
            orig.set_items(items);
            return self.flush_page(&*orig);
        }

        let buckets = if orig.is_rightmost() {
            fill_buckets_rightmost(items, (budget * 9) / 10, budget / 10)
        } else {
            let n = (total + budget - 1) / budget;
            fill_buckets(items, (total + n - 1) / n)
        };
        let n = buckets.len();
        debug_assert!(n >= 2);

        // block allocation happens before any page image changes
        let mut blocks: Vec<u32> = vec![orig.get_pid().page_index];
        for _ in 1..n {
            blocks.push(self.allocate_block()?);
        }

        let boundaries: Vec<Tid> = buckets.iter().skip(1).map(|b| b[0].first_tid()).collect();

        let was_root = orig.is_root();
        let orig_lokey = orig.lokey;
        let orig_hikey = orig.hikey;
        let orig_next = orig.get_right_sibling();

        let mut stack: SplitStack<BTreeLeafPage<I>> = SplitStack::new();
        let mut downlinks: Vec<Downlink> = Vec::new();
        let mut first_bucket: Option<Vec<I>> = None;

        for (k, bucket) in buckets.into_iter().enumerate() {
            if k == 0 {
                first_bucket = Some(bucket);
                continue;
            }

            let lokey = boundaries[k - 1];
            let hikey = if k < n - 1 {
                boundaries[k]
            } else {
                orig_hikey
            };

            let pid = self.leaf_pid(attno, blocks[k]);
            let mut page: BTreeLeafPage<I> = BTreeLeafPage::new_empty(&pid, attno, lokey, hikey);
            page.set_items(bucket);
            page.set_right_sibling(if k < n - 1 {
                Some(blocks[k + 1])
            } else {
                orig_next
            });

            downlinks.push(Downlink::new(lokey, blocks[k]));
            stack.add_new_page(page);
        }

        orig.set_items(first_bucket.unwrap_or_default());
        orig.hikey = boundaries[0];
        orig.set_right_sibling(Some(blocks[1]));
        if was_root {
            orig.set_root(false);
        }

        debug!(
            "repacking leaf {} of attno {}: {} bytes over {} pages",
            blocks[0], attno, total, n
        );
        stack.apply(self, orig)?;

        if was_root {
            let mut all = vec![Downlink::new(orig_lokey, blocks[0])];
            all.extend(downlinks);
            self.newroot(attno, 1, all)
        } else {
            self.insert_downlinks(attno, 1, downlinks)
        }
    }
}

/// Bucketing for the rightmost leaf: the genuinely-last bucket is
/// carved from the back first and capped at `tail_target` (the 10%
/// share), then the 90% share is spread over the earlier buckets at
/// `lead_target`. Future appends land on the mostly empty tail page.
fn fill_buckets_rightmost<I: ArrayItem>(
    mut items: Vec<I>,
    lead_target: usize,
    tail_target: usize,
) -> Vec<Vec<I>> {
    let mut tail: Vec<I> = Vec::new();
    let mut tail_bytes = 0usize;

    while let Some(last) = items.last() {
        let size = last.disk_size();
        if !tail.is_empty() && tail_bytes + size > tail_target {
            break;
        }
        tail_bytes += size;
        tail.push(items.pop().unwrap());
    }
    tail.reverse();

    let mut buckets = fill_buckets(items, lead_target);
    buckets.push(tail);
    buckets
}

/// Greedy byte-budgeted bucketing; a bucket closes when the next item
/// would push it past `target`. Item order is preserved.
fn fill_buckets<I: ArrayItem>(items: Vec<I>, target: usize) -> Vec<Vec<I>> {
    let mut buckets: Vec<Vec<I>> = Vec::new();
    let mut current: Vec<I> = Vec::new();
    let mut current_bytes = 0usize;

    for item in items {
        let size = item.disk_size();
        if !current.is_empty() && current_bytes + size > target {
            buckets.push(std::mem::replace(&mut current, Vec::new()));
            current_bytes = 0;
        }
        current_bytes += size;
        current.push(item);
    }
    if !current.is_empty() {
        buckets.push(current);
    }

    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::tid_item::TidRunItem;
    use crate::mvcc::UndoPtr;

    fn item(first: u64) -> TidRunItem {
        TidRunItem::new(Tid::new(first).unwrap(), 1, UndoPtr::INVALID, 0)
    }

    #[test]
    fn buckets_respect_target() {
        let items: Vec<TidRunItem> = (1..=100).map(item).collect();
        let target = TidRunItem::DISK_SIZE * 10;
        let buckets = fill_buckets(items, target);

        assert_eq!(buckets.len(), 10);
        for b in &buckets {
            assert!(b.len() <= 10);
        }
        let total: usize = buckets.iter().map(|b| b.len()).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn oversized_target_keeps_one_bucket() {
        let items: Vec<TidRunItem> = (1..=5).map(item).collect();
        let buckets = fill_buckets(items, usize::MAX);
        assert_eq!(buckets.len(), 1);
    }

    #[test]
    fn rightmost_bucketing_keeps_the_tail_small() {
        let items: Vec<TidRunItem> = (1..=100).map(item).collect();
        let lead = TidRunItem::DISK_SIZE * 10;
        let tail = TidRunItem::DISK_SIZE * 2;
        let buckets = fill_buckets_rightmost(items, lead, tail);

        let last = buckets.last().unwrap();
        assert!(!last.is_empty());
        assert!(last.len() * TidRunItem::DISK_SIZE <= tail);
        for b in &buckets[..buckets.len() - 1] {
            assert!(b.len() * TidRunItem::DISK_SIZE <= lead);
        }

        assert_eq!(buckets.iter().map(|b| b.len()).sum::<usize>(), 100);
        // order is intact across the seam
        assert_eq!(last.last().unwrap().first_tid.raw(), 100);
    }

    #[test]
    fn exact_multiple_of_the_lead_target_still_gets_a_small_tail() {
        // exactly three lead buckets' worth of items; the tail page
        // must not come out as full as the lead pages
        let items: Vec<TidRunItem> = (1..=30).map(item).collect();
        let lead = TidRunItem::DISK_SIZE * 10;
        let tail = TidRunItem::DISK_SIZE;
        let buckets = fill_buckets_rightmost(items, lead, tail);

        assert_eq!(buckets.last().unwrap().len(), 1);
        assert_eq!(buckets.iter().map(|b| b.len()).sum::<usize>(), 30);
    }
}
