use log::{debug, warn};

use crate::{
    database::Database,
    error::EngineError,
    tid::Tid,
    types::{EngineResult, SimpleResult},
    utils::HandyRwLock,
};

use super::{
    page::{BTreeInternalPage, BTreePageID, Downlink, TreeRoot, TID_TREE_ATTNO},
    split::SplitStack,
    table::ColumnarTable,
};

/// How often navigation restarts from the root before we declare the
/// tree corrupt. Concurrent splits cost a handful of retries at most.
const MAX_RESTARTS: usize = 64;

/// Opaque fields of a page, read under a short share lock. Enough to
/// navigate without knowing the item type.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PageInfo {
    pub lokey: Tid,
    pub hikey: Tid,
    pub right: Option<u32>,
    pub level: u16,
    pub deleted: bool,
    pub is_root: bool,
}

impl ColumnarTable {
    pub(crate) fn leaf_info(&self, attno: u32, block: u32) -> EngineResult<PageInfo> {
        let pid = self.leaf_pid(attno, block);
        if attno == TID_TREE_ATTNO {
            let pod = Database::page_cache().get_tid_leaf_page(&pid)?;
            let page = pod.rl();
            Ok(PageInfo {
                lokey: page.lokey,
                hikey: page.hikey,
                right: page.get_right_sibling(),
                level: page.level,
                deleted: page.is_deleted(),
                is_root: page.is_root(),
            })
        } else {
            let pod = Database::page_cache().get_attr_leaf_page(&pid)?;
            let page = pod.rl();
            Ok(PageInfo {
                lokey: page.lokey,
                hikey: page.hikey,
                right: page.get_right_sibling(),
                level: page.level,
                deleted: page.is_deleted(),
                is_root: page.is_root(),
            })
        }
    }

    fn internal_info(&self, block: u32) -> EngineResult<PageInfo> {
        let pod = Database::page_cache().get_internal_page(&self.internal_pid(block))?;
        let page = pod.rl();
        Ok(PageInfo {
            lokey: page.lokey,
            hikey: page.hikey,
            right: page.get_right_sibling(),
            level: page.level,
            deleted: page.is_deleted(),
            is_root: page.is_root(),
        })
    }

    /// Walk from tree `attno`'s root towards `tid`, stopping at
    /// `target_level` (0 = leaf). Follows right-links when a concurrent
    /// split moved the key range, restarts from the root when the page
    /// under us was unlinked.
    ///
    /// Returns the page id only; the caller locks it and re-validates
    /// with `page_is_expected` (the page may move again in between).
    pub(crate) fn descend(
        &self,
        attno: u32,
        tid: Tid,
        target_level: u16,
    ) -> EngineResult<BTreePageID> {
        for _ in 0..MAX_RESTARTS {
            let root: TreeRoot = self.get_tree_root(attno)?;
            if root.level < target_level {
                return Err(EngineError::corrupt(
                    attno,
                    tid.raw(),
                    root.block,
                    "descent target level above the root",
                ));
            }

            let mut level = root.level;
            let mut block = root.block;
            let mut lost = false;

            'down: loop {
                let info = if level == 0 {
                    self.leaf_info(attno, block)?
                } else {
                    self.internal_info(block)?
                };

                if info.deleted || info.level != level {
                    lost = true;
                    break 'down;
                }

                // concurrent split: the range moved right
                if info.hikey <= tid {
                    match info.right {
                        Some(right) => {
                            block = right;
                            continue 'down;
                        }
                        None => {
                            lost = true;
                            break 'down;
                        }
                    }
                }
                // note: tid may sit below lokey when the range to the
                // left was unlinked; the clamped page is still the
                // correct landing (the tid is simply not present)

                if level == target_level {
                    let pid = if level == 0 {
                        self.leaf_pid(attno, block)
                    } else {
                        self.internal_pid(block)
                    };
                    return Ok(pid);
                }

                let pod = Database::page_cache().get_internal_page(&self.internal_pid(block))?;
                let child = {
                    let page = pod.rl();
                    page.lookup_child(tid)
                };
                match child {
                    Some(d) => {
                        block = d.child;
                        level -= 1;
                    }
                    None => {
                        lost = true;
                        break 'down;
                    }
                }
            }

            if lost {
                debug!(
                    "descent lost at attno {}, tid {:?}, restarting from root",
                    attno, tid
                );
                continue;
            }
        }

        Err(EngineError::corrupt(
            attno,
            tid.raw(),
            0,
            "descent did not converge",
        ))
    }

    /// Validate a cached block against a target without re-descending.
    pub(crate) fn page_is_expected(&self, attno: u32, tid: Tid, level: u16, block: u32) -> bool {
        let info = if level == 0 {
            self.leaf_info(attno, block)
        } else {
            self.internal_info(block)
        };
        match info {
            Ok(info) => {
                !info.deleted && info.level == level && info.lokey <= tid && tid < info.hikey
            }
            Err(_) => false,
        }
    }

    /// Create a new root holding `downlinks` and point the metapage at
    /// it. The caller has already cleared the old root's flag.
    pub(crate) fn newroot(
        &self,
        attno: u32,
        level: u16,
        downlinks: Vec<Downlink>,
    ) -> SimpleResult {
        let block = self.allocate_block()?;
        let pid = self.internal_pid(block);

        let mut root =
            BTreeInternalPage::new_empty(&pid, attno, level, Tid::MIN, Tid::MAX_PLUS_ONE);
        root.set_root(true);
        root.insert_entries(&downlinks);

        self.flush_page(&root)?;
        Database::page_cache().install_page(root);
        self.set_tree_root(attno, TreeRoot { block, level })?;

        debug!(
            "newroot for attno {}: block {}, level {}, {} downlinks",
            attno,
            block,
            level,
            downlinks.len()
        );
        Ok(())
    }

    /// Insert downlinks for freshly split pages into their parents,
    /// splitting parents as needed.
    pub(crate) fn insert_downlinks(
        &self,
        attno: u32,
        parent_level: u16,
        downlinks: Vec<Downlink>,
    ) -> SimpleResult {
        for dl in downlinks {
            self.insert_one_downlink(attno, parent_level, dl)?;
        }
        Ok(())
    }

    fn insert_one_downlink(&self, attno: u32, parent_level: u16, dl: Downlink) -> SimpleResult {
        for _ in 0..MAX_RESTARTS {
            let pid = self.descend(attno, dl.key, parent_level)?;
            let pod = Database::page_cache().get_internal_page(&pid)?;
            let mut page = pod.wl();

            if page.is_deleted() || !page.covers(dl.key) || page.level != parent_level {
                continue;
            }

            if page.fits(1) {
                page.insert_entries(&[dl]);
                return self.flush_page(&*page);
            }

            // no room: split this internal page around the insertion
            return self.split_internal(attno, &mut page, dl);
        }

        Err(EngineError::corrupt(
            attno,
            dl.key.raw(),
            dl.child,
            "downlink insertion did not converge",
        ))
    }

    /// Split an internal page whose entry array is full, inserting
    /// `extra` in the process. `page` is the exclusively locked page.
    fn split_internal(
        &self,
        attno: u32,
        page: &mut BTreeInternalPage,
        extra: Downlink,
    ) -> SimpleResult {
        let mut entries = page.clone_entries();
        let pos = entries
            .iter()
            .position(|e| e.key > extra.key)
            .unwrap_or(entries.len());
        entries.insert(pos, extra);

        let split = entries.len() / 2;
        let left_entries: Vec<Downlink> = entries[..split].to_vec();
        let right_entries: Vec<Downlink> = entries[split..].to_vec();

        // the new page is allocated before any image is applied
        let right_block = self.allocate_block()?;
        let right_pid = self.internal_pid(right_block);
        let split_key = right_entries[0].key;

        let mut right = BTreeInternalPage::new_empty(
            &right_pid,
            attno,
            page.level,
            split_key,
            page.hikey,
        );
        right.set_entries(right_entries);
        right.set_right_sibling(page.get_right_sibling());

        let was_root = page.is_root();
        let level = page.level;
        let orig_block = page.get_pid().page_index;
        let orig_lokey = page.lokey;

        let mut stack: SplitStack<BTreeInternalPage> = SplitStack::new();
        stack.add_new_page(right);

        // shrink the original in place
        page.set_entries(left_entries);
        page.hikey = split_key;
        page.set_right_sibling(Some(right_block));
        if was_root {
            page.set_root(false);
        }

        stack.apply(self, page)?;

        if was_root {
            self.newroot(
                attno,
                level + 1,
                vec![
                    Downlink::new(orig_lokey, orig_block),
                    Downlink::new(split_key, right_block),
                ],
            )
        } else {
            self.insert_one_downlink(attno, level + 1, Downlink::new(split_key, right_block))
        }
    }

    /// Remove an empty leaf (or emptied internal page) from its level:
    /// fix the left sibling's right-link, drop the parent downlink, and
    /// collapse the tree when a root internal page runs out of
    /// children. The root leaf itself is never unlinked.
    pub(crate) fn unlink_page(&self, attno: u32, level: u16, block: u32) -> SimpleResult {
        let info = if level == 0 {
            self.leaf_info(attno, block)?
        } else {
            self.internal_info(block)?
        };

        if info.is_root {
            debug!("unlink skipped, block {} is the root of attno {}", block, attno);
            return Ok(());
        }
        if info.deleted {
            return Ok(());
        }

        // left before right, child level before parent
        if info.lokey > Tid::MIN {
            self.repair_left_sibling(attno, level, block, info)?;
        }

        self.remove_parent_downlink(attno, level, block, info.lokey)?;
        self.mark_page_deleted(attno, level, block)?;

        debug!(
            "unlinked block {} (attno {}, level {}, [{:?}, {:?}))",
            block, attno, level, info.lokey, info.hikey
        );
        Ok(())
    }

    /// Point the left sibling's right-link past the page being removed.
    /// A page nobody points at (its whole left range was unlinked
    /// earlier) needs no repair.
    fn repair_left_sibling(
        &self,
        attno: u32,
        level: u16,
        block: u32,
        info: PageInfo,
    ) -> SimpleResult {
        let left_pid = self.descend(attno, info.lokey.prev(), level)?;
        let mut candidate = left_pid.page_index;

        if candidate == block {
            return Ok(());
        }

        // the predecessor may itself have split; walk right until we
        // find the page actually pointing at us
        for _ in 0..MAX_RESTARTS {
            if self.relink_if_pointing_at(attno, level, candidate, block, info)? {
                return Ok(());
            }

            let left_info = if level == 0 {
                self.leaf_info(attno, candidate)?
            } else {
                self.internal_info(candidate)?
            };
            match left_info.right {
                Some(next) if next != block && next != candidate => candidate = next,
                _ => {
                    debug!(
                        "no left sibling points at block {} (attno {}, level {})",
                        block, attno, level
                    );
                    return Ok(());
                }
            }
        }

        Err(EngineError::corrupt(
            attno,
            info.lokey.raw(),
            block,
            "left sibling walk did not converge",
        ))
    }

    /// If `candidate`'s right-link is `block`, bend it to `block`'s
    /// right sibling. True when done.
    fn relink_if_pointing_at(
        &self,
        attno: u32,
        level: u16,
        candidate: u32,
        block: u32,
        info: PageInfo,
    ) -> EngineResult<bool> {
        if level == 0 {
            if attno == TID_TREE_ATTNO {
                let pod =
                    Database::page_cache().get_tid_leaf_page(&self.leaf_pid(attno, candidate))?;
                let mut page = pod.wl();
                if page.get_right_sibling() == Some(block) {
                    page.set_right_sibling(info.right);
                    self.flush_page(&*page)?;
                    return Ok(true);
                }
            } else {
                let pod =
                    Database::page_cache().get_attr_leaf_page(&self.leaf_pid(attno, candidate))?;
                let mut page = pod.wl();
                if page.get_right_sibling() == Some(block) {
                    page.set_right_sibling(info.right);
                    self.flush_page(&*page)?;
                    return Ok(true);
                }
            }
        } else {
            let pod = Database::page_cache().get_internal_page(&self.internal_pid(candidate))?;
            let mut page = pod.wl();
            if page.get_right_sibling() == Some(block) {
                page.set_right_sibling(info.right);
                self.flush_page(&*page)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn remove_parent_downlink(
        &self,
        attno: u32,
        level: u16,
        block: u32,
        lokey: Tid,
    ) -> SimpleResult {
        for _ in 0..MAX_RESTARTS {
            let parent_pid = self.descend(attno, lokey, level + 1)?;
            let pod = Database::page_cache().get_internal_page(&parent_pid)?;

            let emptied;
            let parent_is_root;
            let parent_level;
            let parent_block;
            {
                let mut parent = pod.wl();
                if parent.is_deleted() || !parent.covers(lokey) {
                    continue;
                }

                let pos = match parent.position_of_child(block) {
                    Some(pos) => pos,
                    None => {
                        warn!(
                            "downlink for block {} missing in parent {} (attno {})",
                            block,
                            parent.get_pid(),
                            attno
                        );
                        return Ok(());
                    }
                };

                parent.remove_entry(pos);
                self.flush_page(&*parent)?;

                emptied = parent.entries_count() == 0;
                parent_is_root = parent.is_root();
                parent_level = parent.level;
                parent_block = parent.get_pid().page_index;
            }

            if emptied {
                if parent_is_root {
                    // the whole tree is gone: start over with an empty
                    // leaf root
                    let root = self.create_empty_tree(attno)?;
                    self.set_tree_root(attno, root)?;
                    self.mark_page_deleted(attno, parent_level, parent_block)?;
                } else {
                    self.unlink_page(attno, parent_level, parent_block)?;
                }
            }
            return Ok(());
        }

        Err(EngineError::corrupt(
            attno,
            lokey.raw(),
            block,
            "parent downlink removal did not converge",
        ))
    }

    pub(crate) fn mark_page_deleted(&self, attno: u32, level: u16, block: u32) -> SimpleResult {
        if level == 0 {
            let pid = self.leaf_pid(attno, block);
            if attno == TID_TREE_ATTNO {
                let pod = Database::page_cache().get_tid_leaf_page(&pid)?;
                {
                    let mut page = pod.wl();
                    page.set_deleted();
                    self.flush_page(&*page)?;
                }
            } else {
                let pod = Database::page_cache().get_attr_leaf_page(&pid)?;
                {
                    let mut page = pod.wl();
                    page.set_deleted();
                    self.flush_page(&*page)?;
                }
            }
            Database::page_cache().discard_page(&pid);
        } else {
            let pid = self.internal_pid(block);
            let pod = Database::page_cache().get_internal_page(&pid)?;
            {
                let mut page = pod.wl();
                page.set_deleted();
                self.flush_page(&*page)?;
            }
            Database::page_cache().discard_page(&pid);
        }
        Ok(())
    }
}

