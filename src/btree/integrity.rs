use itertools::Itertools;
use log::debug;

use crate::{
    database::Database,
    tid::Tid,
    types::EngineResult,
    utils::HandyRwLock,
};

use super::{
    page::{ArrayItem, TID_TREE_ATTNO},
    table::ColumnarTable,
};

/// Structural checking and debug dumps, test and maintenance surface.
/// Violations panic with context; this is the executable form of the
/// tree invariants, not a recovery path.
impl ColumnarTable {
    /// Check every tree of the table:
    /// - items strictly ordered, non-empty, non-overlapping, inside
    ///   their leaf's `[lokey, hikey)`;
    /// - every downlink points at a child whose lokey equals its key;
    /// - right-links at leaf level visit exactly the recursion's
    ///   leaves, left to right, and terminate;
    /// - the ROOT flag sits on the root page and nowhere else.
    pub fn check_integrity(&self) {
        let tree_count = self.tree_count().expect("metapage unreadable");

        for attno in 0..tree_count {
            let root = self.get_tree_root(attno).expect("missing tree root");

            let mut leaves: Vec<u32> = Vec::new();
            self.check_subtree(
                attno,
                root.block,
                root.level,
                Tid::MIN,
                Tid::MAX_PLUS_ONE,
                true,
                &mut leaves,
            );

            // the right-link chain must rediscover the same leaves
            let mut walked: Vec<u32> = Vec::new();
            let mut block = leaves[0];
            loop {
                walked.push(block);
                assert!(
                    walked.len() <= leaves.len(),
                    "attno {}: right-link chain is longer than the tree ({} leaves)",
                    attno,
                    leaves.len()
                );

                let info = self.leaf_info(attno, block).expect("leaf unreadable");
                match info.right {
                    Some(next) => block = next,
                    None => {
                        assert!(
                            info.hikey == Tid::MAX_PLUS_ONE,
                            "attno {}: chain ends before the right edge at block {}",
                            attno,
                            block
                        );
                        break;
                    }
                }
            }
            assert_eq!(
                leaves, walked,
                "attno {}: downlink order and right-link order disagree",
                attno
            );
        }
    }

    fn check_subtree(
        &self,
        attno: u32,
        block: u32,
        level: u16,
        lokey: Tid,
        hikey: Tid,
        is_root: bool,
        leaves: &mut Vec<u32>,
    ) {
        if level == 0 {
            let info = self.leaf_info(attno, block).expect("leaf unreadable");
            assert!(!info.deleted, "attno {}: live downlink to deleted block {}", attno, block);
            assert_eq!(info.level, 0, "attno {}: block {} level mismatch", attno, block);
            assert_eq!(
                info.lokey, lokey,
                "attno {}: block {} lokey differs from its downlink",
                attno, block
            );
            assert_eq!(
                info.hikey, hikey,
                "attno {}: block {} hikey differs from its successor's lokey",
                attno, block
            );
            assert_eq!(
                info.is_root, is_root,
                "attno {}: ROOT flag misplaced on block {}",
                attno, block
            );

            for (first, end) in self.leaf_item_ranges(attno, block).expect("leaf unreadable") {
                assert!(first < end, "attno {}: empty item range at block {}", attno, block);
                assert!(
                    lokey <= first && end <= hikey,
                    "attno {}: item [{:?}, {:?}) outside block {} range",
                    attno,
                    first,
                    end,
                    block
                );
            }
            for ((_, e1), (f2, _)) in self
                .leaf_item_ranges(attno, block)
                .expect("leaf unreadable")
                .into_iter()
                .tuple_windows()
            {
                assert!(
                    e1 <= f2,
                    "attno {}: overlapping or unordered items at block {}",
                    attno,
                    block
                );
            }

            leaves.push(block);
            return;
        }

        let pod = Database::page_cache()
            .get_internal_page(&self.internal_pid(block))
            .expect("internal page unreadable");
        let page = pod.rl();

        assert!(!page.is_deleted());
        assert_eq!(page.level, level);
        assert_eq!(page.lokey, lokey);
        assert_eq!(page.hikey, hikey);
        assert_eq!(page.is_root(), is_root);
        assert!(
            page.entries_count() > 0,
            "attno {}: internal block {} has no downlinks",
            attno,
            block
        );

        let entries = page.clone_entries();
        drop(page);

        for (e1, e2) in entries.iter().tuple_windows() {
            assert!(e1.key < e2.key, "attno {}: unordered downlinks at {}", attno, block);
        }

        for (i, entry) in entries.iter().enumerate() {
            let child_hikey = entries.get(i + 1).map(|e| e.key).unwrap_or(hikey);
            self.check_subtree(
                attno,
                entry.child,
                level - 1,
                entry.key,
                child_hikey,
                false,
                leaves,
            );
        }
    }

    fn leaf_item_ranges(&self, attno: u32, block: u32) -> EngineResult<Vec<(Tid, Tid)>> {
        let pid = self.leaf_pid(attno, block);
        if attno == TID_TREE_ATTNO {
            let pod = Database::page_cache().get_tid_leaf_page(&pid)?;
            let page = pod.rl();
            Ok(page
                .items()
                .iter()
                .map(|i| (ArrayItem::first_tid(i), ArrayItem::end_tid(i)))
                .collect())
        } else {
            let pod = Database::page_cache().get_attr_leaf_page(&pid)?;
            let page = pod.rl();
            Ok(page
                .items()
                .iter()
                .map(|i| (ArrayItem::first_tid(i), ArrayItem::end_tid(i)))
                .collect())
        }
    }

    /// Log the tree shape, root first. `max_level = -1` prints
    /// everything; only runs when debug logging is on.
    pub fn draw_tree(&self, max_level: i32) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }

        let mut depiction = String::new();
        depiction.push_str("\n\n----- TREE STRUCTURE START -----\n");

        let tree_count = self.tree_count().unwrap_or(0);
        for attno in 0..tree_count {
            let root = match self.get_tree_root(attno) {
                Ok(root) => root,
                Err(_) => continue,
            };
            depiction.push_str(&format!(
                "tree {} (root block {}, level {}):\n",
                attno, root.block, root.level
            ));
            self.draw_subtree(attno, root.block, root.level, 1, max_level, &mut depiction);
        }

        depiction.push_str("----- TREE STRUCTURE END   -----\n");
        debug!("{}", depiction);
    }

    fn draw_subtree(
        &self,
        attno: u32,
        block: u32,
        level: u16,
        depth: usize,
        max_level: i32,
        out: &mut String,
    ) {
        let prefix = "   ".repeat(depth);

        if level == 0 {
            match self.leaf_item_ranges(attno, block) {
                Ok(ranges) => {
                    let span = match (ranges.first(), ranges.last()) {
                        (Some((f, _)), Some((_, e))) => format!("[{:?}, {:?})", f, e),
                        _ => "(empty)".to_string(),
                    };
                    out.push_str(&format!(
                        "{}leaf {} ({} items) {}\n",
                        prefix,
                        block,
                        ranges.len(),
                        span
                    ));
                }
                Err(_) => out.push_str(&format!("{}leaf {} (unreadable)\n", prefix, block)),
            }
            return;
        }

        let pod = match Database::page_cache().get_internal_page(&self.internal_pid(block)) {
            Ok(pod) => pod,
            Err(_) => {
                out.push_str(&format!("{}internal {} (unreadable)\n", prefix, block));
                return;
            }
        };
        let entries = pod.rl().clone_entries();

        out.push_str(&format!(
            "{}internal {} ({} downlinks, level {})\n",
            prefix,
            block,
            entries.len(),
            level
        ));
        if max_level != -1 && depth as i32 >= max_level {
            return;
        }
        for entry in entries {
            out.push_str(&format!("{}   key {:?}:\n", prefix, entry.key));
            self.draw_subtree(attno, entry.child, level - 1, depth + 1, max_level, out);
        }
    }
}
