// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The block pool.
//!
//! Pages live in a flat, in-memory pool of fixed-size blocks. A pin is
//! simply a clone of the page's `Arc`; SHARE and EXCLUSIVE page locks
//! are the two sides of the page's `RwLock`. The tree never frees a
//! block; reuse is a host-engine concern.

use crate::page::PageBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A block number addressing one page in the pool.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(u32);

impl BlockId {
    /// The "no block" sentinel.
    pub const INVALID: Self = Self(u32::MAX);

    /// Wraps a raw block number.
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw block number.
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Whether this addresses a block.
    #[must_use]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A pinned page. Dropping the handle unpins it.
pub type PageHandle = Arc<RwLock<PageBuf>>;

/// Takes the SHARE lock on a pinned page.
pub(crate) fn lock_shared(handle: &PageHandle) -> RwLockReadGuard<'_, PageBuf> {
    handle.read().expect("lock is poisoned")
}

/// Takes the EXCLUSIVE lock on a pinned page.
pub(crate) fn lock_exclusive(handle: &PageHandle) -> RwLockWriteGuard<'_, PageBuf> {
    handle.write().expect("lock is poisoned")
}

/// An in-memory pool of fixed-size blocks.
pub struct BufferPool {
    pages: RwLock<Vec<PageHandle>>,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self {
            pages: RwLock::new(Vec::new()),
        }
    }
}

impl BufferPool {
    /// Allocates a fresh zeroed block and pins it.
    ///
    /// The caller initializes the page before publishing a link to it,
    /// so handing it out unlocked is safe.
    pub fn allocate(&self) -> (BlockId, PageHandle) {
        let mut pages = self.pages.write().expect("lock is poisoned");
        let handle: PageHandle = Arc::new(RwLock::new(PageBuf::zeroed()));
        #[allow(clippy::cast_possible_truncation)]
        let blk = BlockId::from_raw(pages.len() as u32);
        pages.push(handle.clone());

        log::trace!("allocated block {blk}");

        (blk, handle)
    }

    /// Pins an existing block.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidBlock`] for block numbers the
    /// pool never handed out.
    pub fn get(&self, blk: BlockId) -> crate::Result<PageHandle> {
        let pages = self.pages.read().expect("lock is poisoned");

        pages
            .get(usize::try_from(blk.raw()).expect("u32 fits in usize"))
            .cloned()
            .ok_or(crate::Error::InvalidBlock(blk))
    }

    /// Number of allocated blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.read().expect("lock is poisoned").len()
    }

    /// Whether no blocks were allocated yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn allocate_and_get() -> crate::Result<()> {
        let pool = BufferPool::default();
        assert!(pool.is_empty());

        let (a, _) = pool.allocate();
        let (b, _) = pool.allocate();
        assert_ne!(a, b);
        assert_eq!(2, pool.len());

        assert!(pool.get(a).is_ok());
        assert!(pool.get(BlockId::from_raw(99)).is_err());
        assert!(pool.get(BlockId::INVALID).is_err());

        Ok(())
    }

    #[test]
    fn share_then_exclusive() {
        let pool = BufferPool::default();
        let (_, handle) = pool.allocate();

        {
            let _a = lock_shared(&handle);
            let _b = lock_shared(&handle);
        }
        let _c = lock_exclusive(&handle);
    }
}
