// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{buffer::BufferPool, meta::MetaStore, undo::UndoLog, AttrNo, AttrSpec, Config, Tree};
use std::sync::Arc;

pub(crate) struct StoreInner {
    pub pool: BufferPool,
    pub meta: MetaStore,
    pub undo: UndoLog,
    pub config: Config,
}

/// Shared state of one table's column trees: the block pool, the
/// metapage directory and the undo log.
///
/// Cloning is cheap (`Arc`). A `Store` and all trees opened from it
/// can be used from multiple threads.
#[derive(Clone)]
pub struct Store {
    pub(crate) inner: Arc<StoreInner>,
}

impl Store {
    /// Creates an empty store.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                pool: BufferPool::default(),
                meta: MetaStore::default(),
                undo: UndoLog::default(),
                config,
            }),
        }
    }

    /// Opens the tree of one attribute, registering its descriptor.
    ///
    /// # Errors
    ///
    /// Fails if the attribute was registered before with a different
    /// descriptor.
    pub fn tree(&self, attno: AttrNo, spec: AttrSpec) -> crate::Result<Tree> {
        self.inner.meta.register(attno, spec)?;
        Ok(Tree::new(self.clone(), attno, spec))
    }

    /// The store's undo log.
    ///
    /// Exposed so a vacuum-like caller can create undo records for
    /// [`Tree::mark_dead`] and advance the discard horizon.
    #[must_use]
    pub fn undo_log(&self) -> &UndoLog {
        &self.inner.undo
    }

    /// The store's configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The store's block pool.
    #[doc(hidden)]
    #[must_use]
    pub fn pool(&self) -> &BufferPool {
        &self.inner.pool
    }
}
