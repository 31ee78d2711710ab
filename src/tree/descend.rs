// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Tree descent.
//!
//! Descent is crab-style: at most one page lock is held at a time, a
//! page's lock is dropped before its child is locked. Concurrent
//! splits are tolerated through the Lehman–Yao right-links: whenever
//! the search key is at or above a page's high key, the page has been
//! split underneath us and the key moved right, so we follow the
//! right-link instead of reporting a structural error.
//!
//! Internal pages are share-locked. The leaf lock mode is the
//! caller's choice; because a share lock is never upgraded in place,
//! mutators re-check the high key after taking the exclusive leaf
//! lock and keep walking right if the key has moved.

use super::Tree;
use crate::{
    buffer::{lock_exclusive, lock_shared, BlockId},
    page::{PageBuf, PAGE_KIND_BTREE},
    Tid,
};

/// Lower-bound search over an internal page's downlinks: index of the
/// greatest separator `<= key`, or `None` if every separator is
/// greater (the caller then walks right).
pub(crate) fn binsrch_downlinks(page: &PageBuf, key: Tid) -> Option<usize> {
    let mut low = 0;
    let mut high = page.downlink_count();

    while high > low {
        let mid = low + (high - low) / 2;

        if key >= page.downlink(mid).0 {
            low = mid + 1;
        } else {
            high = mid;
        }
    }

    low.checked_sub(1)
}

impl Tree {
    /// Walks from `root` down to the block of the leaf covering
    /// `key`, share-locking one page at a time.
    pub(crate) fn descend_to_leaf(&self, root: BlockId, key: Tid) -> crate::Result<BlockId> {
        let mut next = root;
        let mut expected: Option<u16> = None;

        loop {
            let handle = self.pool().get(next)?;
            let page = lock_shared(&handle);
            debug_assert_eq!(PAGE_KIND_BTREE, page.kind());

            if let Some(level) = expected {
                if page.level() != level {
                    return Err(crate::Error::LevelMismatch {
                        expected: level,
                        found: page.level(),
                    });
                }
            }

            if page.level() == 0 {
                return Ok(next);
            }

            if key >= page.hikey() {
                // Concurrent split: the key moved right.
                let right = page.next();
                if right == next {
                    return Err(crate::Error::RightLinkSelfLoop(next));
                }
                if !right.is_valid() {
                    return Err(crate::Error::FellOffEnd);
                }

                log::trace!("descent for {key} walking right to {right}");
                expected = Some(page.level());
                next = right;
            } else {
                let idx = binsrch_downlinks(&page, key)
                    .ok_or(crate::Error::DescentFailed(key))?;
                expected = Some(page.level() - 1);
                next = page.downlink(idx).1;
            }
        }
    }

    /// Runs `f` on the exclusive-locked leaf currently covering
    /// `key`.
    pub(crate) fn with_leaf_exclusive<R>(
        &self,
        root: BlockId,
        key: Tid,
        f: impl FnOnce(&mut PageBuf, BlockId) -> crate::Result<R>,
    ) -> crate::Result<R> {
        let mut blk = self.descend_to_leaf(root, key)?;

        loop {
            let handle = self.pool().get(blk)?;
            let mut page = lock_exclusive(&handle);

            if page.level() != 0 {
                return Err(crate::Error::LevelMismatch {
                    expected: 0,
                    found: page.level(),
                });
            }

            if key >= page.hikey() {
                let right = page.next();
                if right == blk {
                    return Err(crate::Error::RightLinkSelfLoop(blk));
                }
                if !right.is_valid() {
                    return Err(crate::Error::FellOffEnd);
                }
                blk = right;
                continue;
            }

            return f(&mut page, blk);
        }
    }

    /// Runs `f` on the share-locked leaf currently covering `key`.
    pub(crate) fn with_leaf_shared<R>(
        &self,
        root: BlockId,
        key: Tid,
        f: impl FnOnce(&PageBuf, BlockId) -> crate::Result<R>,
    ) -> crate::Result<R> {
        let mut blk = self.descend_to_leaf(root, key)?;

        loop {
            let handle = self.pool().get(blk)?;
            let page = lock_shared(&handle);

            if page.level() != 0 {
                return Err(crate::Error::LevelMismatch {
                    expected: 0,
                    found: page.level(),
                });
            }

            if key >= page.hikey() {
                let right = page.next();
                if right == blk {
                    return Err(crate::Error::RightLinkSelfLoop(blk));
                }
                if !right.is_valid() {
                    return Err(crate::Error::FellOffEnd);
                }
                blk = right;
                continue;
            }

            return f(&page, blk);
        }
    }
}
