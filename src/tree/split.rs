// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Downlink installation and internal page splits.
//!
//! Lock order is child before parent, left before right, at every
//! level; descent itself never holds two page locks at once, so a
//! split cascade cannot deadlock against concurrent descents.

use super::{descend::binsrch_downlinks, Tree};
use crate::{
    buffer::{lock_exclusive, BlockId},
    page::{PageBuf, PAGE_KIND_BTREE},
    Tid,
};

impl Tree {
    /// After a split, inserts the downlink for the new right page
    /// (`right_lokey` → `right_blk`) into the parent of `left`, and
    /// clears `left`'s FOLLOW_RIGHT flag.
    ///
    /// `left` is the exclusive-locked left half at `left_blk`. If it
    /// is the root, a new root is built instead. If the parent
    /// overflows, it is split and the installation recurses.
    pub(crate) fn insert_downlink(
        &self,
        left: &mut PageBuf,
        left_blk: BlockId,
        right_lokey: Tid,
        right_blk: BlockId,
    ) -> crate::Result<()> {
        let left_lokey = left.lokey();
        let left_level = left.level();

        let root = self
            .meta()
            .root(self.attno)
            .ok_or(crate::Error::DownlinkNotFound(left_blk))?;

        if root == left_blk {
            return self.new_root(left, left_blk, right_lokey, right_blk);
        }

        // Re-find the parent from the root. The path was just
        // descended, but remembering it across the recompressor would
        // tie the two components together for little gain.
        let mut next = root;
        let mut expected: Option<u16> = None;

        loop {
            let handle = self.pool().get(next)?;
            let mut page = lock_exclusive(&handle);
            debug_assert_eq!(PAGE_KIND_BTREE, page.kind());

            if let Some(level) = expected {
                if page.level() != level {
                    return Err(crate::Error::LevelMismatch {
                        expected: level,
                        found: page.level(),
                    });
                }
            }

            if page.level() <= left_level {
                return Err(crate::Error::LevelMismatch {
                    expected: left_level + 1,
                    found: page.level(),
                });
            }

            if left_lokey >= page.hikey() {
                let right = page.next();
                if right == next {
                    return Err(crate::Error::RightLinkSelfLoop(next));
                }
                if !right.is_valid() {
                    return Err(crate::Error::FellOffEnd);
                }
                expected = Some(page.level());
                next = right;
                continue;
            }

            let idx = binsrch_downlinks(&page, left_lokey)
                .ok_or(crate::Error::DescentFailed(left_lokey))?;

            if page.level() == left_level + 1 {
                let (separator, child) = page.downlink(idx);
                if separator != left_lokey || child != left_blk {
                    return Err(crate::Error::DownlinkNotFound(left_blk));
                }

                let insert_at = idx + 1;

                if !page.downlink_fits() {
                    return self.split_internal_page(
                        &mut page,
                        next,
                        left,
                        insert_at,
                        right_lokey,
                        right_blk,
                    );
                }

                page.insert_downlink_at(insert_at, right_lokey, right_blk);
                left.clear_follow_right();

                log::trace!(
                    "installed downlink {right_lokey} -> {right_blk} in parent {next}",
                );

                return Ok(());
            }

            expected = Some(page.level() - 1);
            next = page.downlink(idx).1;
        }
    }

    /// Splits the internal page `parent` to make room, placing the
    /// new downlink on the proper half, then recurses to parent the
    /// new right half.
    ///
    /// The split point is right-heavy (the configured ratio) when the
    /// insertion point is the right edge — the TID-monotone append
    /// case — and 50/50 for interior insertions. `child` is the page
    /// whose split triggered the insertion; its FOLLOW_RIGHT is
    /// cleared here because its downlink lands during the copy.
    fn split_internal_page(
        &self,
        parent: &mut PageBuf,
        parent_blk: BlockId,
        child: &mut PageBuf,
        insert_at: usize,
        new_key: Tid,
        new_child: BlockId,
    ) -> crate::Result<()> {
        debug_assert!(parent.level() > 0);
        debug_assert!(
            !parent.follow_right(),
            "previous incomplete split must be finished first",
        );

        let count = parent.downlink_count();
        let ratio = if insert_at >= count {
            self.config().split_ratio
        } else {
            0.5
        };

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let split_point = ((count as f32 * ratio) as usize).clamp(1, count - 1);
        let (split_tid, _) = parent.downlink(split_point);
        let new_on_left = new_key < split_tid;

        let (right_blk, right_handle) = self.pool().allocate();

        let mut left_page = PageBuf::new(
            PAGE_KIND_BTREE,
            self.attno,
            parent.level(),
            parent.lokey(),
            split_tid,
        );
        left_page.set_next(right_blk);
        left_page.raise_follow_right();

        let mut right_page = PageBuf::new(
            PAGE_KIND_BTREE,
            self.attno,
            parent.level(),
            split_tid,
            parent.hikey(),
        );
        right_page.set_next(parent.next());

        for i in 0..count {
            if i == insert_at {
                if new_on_left {
                    left_page.push_downlink(new_key, new_child);
                } else {
                    right_page.push_downlink(new_key, new_child);
                }
            }

            let (separator, child_blk) = parent.downlink(i);
            if i < split_point {
                left_page.push_downlink(separator, child_blk);
            } else {
                right_page.push_downlink(separator, child_blk);
            }
        }

        // the new downlink may go past the last existing one
        if insert_at >= count {
            debug_assert!(!new_on_left);
            right_page.push_downlink(new_key, new_child);
        }

        debug_assert_eq!(
            count + 1,
            left_page.downlink_count() + right_page.downlink_count(),
        );

        parent.replace_with(left_page);
        *lock_exclusive(&right_handle) = right_page;

        child.clear_follow_right();

        log::debug!(
            "internal page {parent_blk} of attribute {} split at {split_tid}",
            self.attno,
        );

        // parent the new right half (this may split again, all the
        // way up to a new root)
        self.insert_downlink(parent, parent_blk, split_tid, right_blk)
    }

    /// Builds a new root one level up, holding exactly the two
    /// downlinks of the just-split pair, and repoints the metapage
    /// directory at it.
    fn new_root(
        &self,
        left: &mut PageBuf,
        left_blk: BlockId,
        right_lokey: Tid,
        right_blk: BlockId,
    ) -> crate::Result<()> {
        debug_assert!(left.lokey() < right_lokey);

        let level = left.level() + 1;
        let (root_blk, root_handle) = self.pool().allocate();

        let mut root_page = PageBuf::new(
            PAGE_KIND_BTREE,
            self.attno,
            level,
            Tid::MIN,
            Tid::MAX_PLUS_ONE,
        );
        root_page.push_downlink(left.lokey(), left_blk);
        root_page.push_downlink(right_lokey, right_blk);

        *lock_exclusive(&root_handle) = root_page;

        left.clear_follow_right();
        self.meta().update_root(self.attno, root_blk);

        log::debug!(
            "new level-{level} root {root_blk} for attribute {}",
            self.attno,
        );

        Ok(())
    }
}
