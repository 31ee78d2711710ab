// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The metapage directory.
//!
//! The root block of every attribute tree is the only piece of global
//! mutable tree state. All reads and updates of it funnel through this
//! store, under its own lock; tree pages are never locked while the
//! directory lock is held for anything slower than a map access.

use crate::{
    buffer::{lock_exclusive, BlockId, BufferPool},
    page::{PageBuf, PAGE_KIND_BTREE},
    AttrNo, AttrSpec, Tid,
};
use rustc_hash::FxHashMap;
use std::sync::Mutex;

#[derive(Copy, Clone)]
struct MetaEntry {
    spec: AttrSpec,
    root: BlockId,
}

/// Per-attribute root directory.
pub(crate) struct MetaStore {
    entries: Mutex<FxHashMap<AttrNo, MetaEntry>>,
}

impl Default for MetaStore {
    fn default() -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
        }
    }
}

impl MetaStore {
    /// Registers an attribute, or re-checks its descriptor if it is
    /// already known.
    pub fn register(&self, attno: AttrNo, spec: AttrSpec) -> crate::Result<()> {
        let mut entries = self.entries.lock().expect("lock is poisoned");

        match entries.get(&attno) {
            Some(entry) if entry.spec != spec => Err(crate::Error::AttrSpecMismatch),
            Some(_) => Ok(()),
            None => {
                entries.insert(
                    attno,
                    MetaEntry {
                        spec,
                        root: BlockId::INVALID,
                    },
                );
                Ok(())
            }
        }
    }

    /// Current root of the attribute's tree, if it has one.
    pub fn root(&self, attno: AttrNo) -> Option<BlockId> {
        let entries = self.entries.lock().expect("lock is poisoned");
        entries
            .get(&attno)
            .map(|e| e.root)
            .filter(|blk| blk.is_valid())
    }

    /// Current root, creating the tree's first (leaf) root page if
    /// there is none yet.
    pub fn root_or_create(
        &self,
        attno: AttrNo,
        spec: &AttrSpec,
        pool: &BufferPool,
    ) -> crate::Result<BlockId> {
        let mut entries = self.entries.lock().expect("lock is poisoned");

        let Some(entry) = entries.get_mut(&attno) else {
            return Err(crate::Error::AttrSpecMismatch);
        };
        if entry.spec != *spec {
            return Err(crate::Error::AttrSpecMismatch);
        }

        if !entry.root.is_valid() {
            let (blk, handle) = pool.allocate();
            *lock_exclusive(&handle) =
                PageBuf::new(PAGE_KIND_BTREE, attno, 0, Tid::MIN, Tid::MAX_PLUS_ONE);
            entry.root = blk;

            log::debug!("created root leaf {blk} for attribute {attno}");
        }

        Ok(entry.root)
    }

    /// Repoints the attribute's root after a root split.
    pub fn update_root(&self, attno: AttrNo, new_root: BlockId) {
        let mut entries = self.entries.lock().expect("lock is poisoned");
        let entry = entries.get_mut(&attno).expect("attribute is registered");
        entry.root = new_root;

        log::debug!("root of attribute {attno} moved to {new_root}");
    }
}
