// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! One attribute's B+ tree.
//!
//! Writes descend to a leaf, perform a logical edit through
//! `replace_item`, and leave the physical layout to the recompressor,
//! which may split the leaf and install downlinks. Reads stream
//! through [`scan::Scan`] or fetch a single TID. Every write stamps
//! its items with an undo pointer so snapshots can filter row
//! versions.

mod descend;
mod fetch;
mod recompress;
mod replace;
pub mod scan;
mod split;

use crate::{
    buffer::{BlockId, BufferPool},
    coding::Decode,
    datum,
    item::{create_item, Item, ItemFlags, Payload, SingleItem},
    meta::MetaStore,
    page::PageBuf,
    undo::{LockMode, UndoKind, UndoLog, UndoPtr, UndoRecord},
    visibility::{self, Snapshot, UpdateResult},
    AttrNo, AttrSpec, CmdId, Config, Datum, Slice, Store, Tid, TxId,
};
use self::scan::Scan;

/// Handle to one attribute's B+ tree.
///
/// Cloning is cheap; clones share the underlying [`Store`].
#[derive(Clone)]
pub struct Tree {
    pub(crate) store: Store,
    pub(crate) attno: AttrNo,
    pub(crate) spec: AttrSpec,
}

impl Tree {
    pub(crate) fn new(store: Store, attno: AttrNo, spec: AttrSpec) -> Self {
        Self { store, attno, spec }
    }

    /// The attribute number this tree belongs to.
    #[must_use]
    pub fn attno(&self) -> AttrNo {
        self.attno
    }

    /// The attribute descriptor.
    #[must_use]
    pub fn spec(&self) -> AttrSpec {
        self.spec
    }

    pub(crate) fn pool(&self) -> &BufferPool {
        &self.store.inner.pool
    }

    pub(crate) fn meta(&self) -> &MetaStore {
        &self.store.inner.meta
    }

    pub(crate) fn undo(&self) -> &UndoLog {
        &self.store.inner.undo
    }

    pub(crate) fn config(&self) -> &Config {
        &self.store.inner.config
    }

    /// Starts a forward scan from `start` under `snapshot`.
    ///
    /// Emitted TIDs are strictly increasing and `>= start`. A scan on
    /// an empty tree is inert and yields nothing.
    ///
    /// # Errors
    ///
    /// Will return `Err` on structural corruption.
    pub fn scan(&self, start: Tid, snapshot: Snapshot) -> crate::Result<Scan> {
        Scan::new(self, start, snapshot)
    }

    /// Bulk-inserts values, assigning TIDs from one past the current
    /// rightmost TID. Returns the assigned TIDs, in order.
    ///
    /// # Errors
    ///
    /// Will return `Err` if a datum exceeds the configured maximum
    /// size, or on structural corruption.
    pub fn insert(&self, values: &[Datum], xid: TxId, cid: CmdId) -> crate::Result<Vec<Tid>> {
        self.insert_with(values, None, xid, cid, None)
            .map(|(tids, _)| tids)
    }

    /// Bulk-inserts values, optionally with caller-chosen TIDs and a
    /// previously created insert undo record.
    ///
    /// When a row spans several column trees, the first tree's insert
    /// assigns the TIDs and creates the undo record; sibling trees are
    /// then fed the same `tids` and `undo` so all column values of one
    /// row share them. Returns the TID list and the undo pointer
    /// stamped into the items.
    ///
    /// # Errors
    ///
    /// Will return `Err` if a datum exceeds the configured maximum
    /// size, or on structural corruption.
    ///
    /// # Panics
    ///
    /// Panics if `tids` is given with a different length than
    /// `values`.
    pub fn insert_with(
        &self,
        values: &[Datum],
        tids: Option<&[Tid]>,
        xid: TxId,
        cid: CmdId,
        undo: Option<UndoPtr>,
    ) -> crate::Result<(Vec<Tid>, UndoPtr)> {
        if values.is_empty() {
            return Ok((Vec::new(), undo.unwrap_or(UndoPtr::INVALID)));
        }

        if let Some(given) = tids {
            assert_eq!(given.len(), values.len(), "one TID per value");
            debug_assert!(given.iter().all(|t| t.is_valid()));
        }

        for value in values.iter().flatten() {
            let size = datum::encoded_size(&self.spec, value);
            if size > self.config().max_datum_size {
                return Err(crate::Error::DatumTooLarge(size));
            }
        }

        let root = self
            .meta()
            .root_or_create(self.attno, &self.spec, self.pool())?;
        let target = tids.map_or(Tid::MAX, |given| given.first().copied().expect("non-empty"));

        self.with_leaf_exclusive(root, target, |page, blk| {
            let assigned: Vec<Tid> = match tids {
                Some(given) => given.to_vec(),
                None => {
                    // Assign from one past the rightmost existing TID;
                    // an empty page starts at its own low key.
                    let first = match last_item(page)? {
                        Some(item) => item.last_tid().next(),
                        None => page.lokey(),
                    };
                    (0..values.len() as u64)
                        .map(|k| Tid::new(first.raw() + k))
                        .collect()
                }
            };

            let undo_ptr = match undo {
                Some(ptr) if ptr.is_valid() => ptr,
                _ => self.undo().insert(UndoRecord {
                    kind: UndoKind::Insert {
                        end_tid: assigned.last().copied().expect("non-empty"),
                    },
                    attno: self.attno,
                    xid,
                    cid,
                    tid: assigned.first().copied().expect("non-empty"),
                    prev: UndoPtr::INVALID,
                }),
            };

            let new_items = self.build_insert_items(values, &assigned, undo_ptr);
            self.replace_item(page, blk, None, None, new_items)?;

            Ok((assigned, undo_ptr))
        })
    }

    /// Coalesces an insert batch into Single/Array items.
    ///
    /// A run of consecutive TIDs with identical NULL-ness becomes one
    /// array, capped by the coalescing quota so updates in the middle
    /// of an array do not rewrite unbounded payloads.
    fn build_insert_items(&self, values: &[Datum], tids: &[Tid], undo_ptr: UndoPtr) -> Vec<Item> {
        let quota = self.config().coalesce_quota;
        let mut items = Vec::new();

        let mut i = 0;
        while i < values.len() {
            let isnull = values.get(i).expect("in bounds").is_none();
            let mut datasz = values
                .get(i)
                .expect("in bounds")
                .as_ref()
                .map_or(0, |v| datum::encoded_size(&self.spec, v));

            let mut j = i + 1;
            while j < values.len() && datasz < quota && (j - i) < usize::from(u16::MAX) {
                let value = values.get(j).expect("in bounds");

                if value.is_none() != isnull {
                    break;
                }
                if tids.get(j) != tids.get(j - 1).map(|t| t.next()).as_ref() {
                    break;
                }

                if let Some(v) = value {
                    datasz += datum::encoded_size(&self.spec, v);
                }
                j += 1;
            }

            #[allow(clippy::cast_possible_truncation)]
            let nelements = (j - i) as u16;
            let first_tid = tids.get(i).copied().expect("in bounds");

            let item = if isnull {
                create_item(
                    &self.spec,
                    first_tid,
                    undo_ptr,
                    nelements,
                    Payload::Packed(&[]),
                    true,
                )
            } else {
                let run: Vec<Slice> = values
                    .get(i..j)
                    .expect("in bounds")
                    .iter()
                    .map(|v| v.clone().expect("non-null run"))
                    .collect();
                create_item(
                    &self.spec,
                    first_tid,
                    undo_ptr,
                    nelements,
                    Payload::Values(&run),
                    false,
                )
            };

            items.push(item);
            i = j;
        }

        items
    }

    /// Deletes the tuple at `tid`.
    ///
    /// Returns a non-[`UpdateResult::Ok`] outcome without changing
    /// anything if the tuple is not deletable under `snapshot`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the TID does not exist, or on structural
    /// corruption.
    pub fn delete(
        &self,
        tid: Tid,
        xid: TxId,
        cid: CmdId,
        snapshot: &Snapshot,
    ) -> crate::Result<UpdateResult> {
        self.with_fetched_exclusive(tid, |page, blk, item| {
            let (result, keep) =
                visibility::satisfies_update(self.undo(), snapshot, item.flags, item.undo);
            if result != UpdateResult::Ok {
                return Ok(result);
            }

            let undo_ptr = self.undo().insert(UndoRecord {
                kind: UndoKind::Delete,
                attno: self.attno,
                xid,
                cid,
                tid,
                prev: if keep { item.undo } else { UndoPtr::INVALID },
            });

            let mut deleted = item;
            deleted.flags |= ItemFlags::DELETED;
            deleted.undo = undo_ptr;

            self.replace_item(page, blk, Some(tid), Some(Item::Single(deleted)), Vec::new())?;

            Ok(UpdateResult::Ok)
        })?
        .ok_or(crate::Error::ItemNotFound(tid))
    }

    /// Updates the tuple at `otid` to `new_value`.
    ///
    /// The new version is inserted as an independent row at a fresh
    /// TID (returned on success); the old version becomes a forwarding
    /// marker pointing at it through its undo record.
    ///
    /// # Errors
    ///
    /// Will return `Err` if `otid` does not exist, if the old version
    /// is concurrently modified between the insert and mark phases, or
    /// on structural corruption.
    pub fn update(
        &self,
        otid: Tid,
        new_value: Datum,
        xid: TxId,
        cid: CmdId,
        snapshot: &Snapshot,
    ) -> crate::Result<(UpdateResult, Option<Tid>)> {
        // Phase 1: check the old version is ours to take.
        //
        // No lock record is written; a competing update in the window
        // up to phase 3 surfaces as `ConcurrentlyUpdated` there.
        let state = self
            .with_fetched_exclusive(otid, |_page, _blk, item| {
                Ok(visibility::satisfies_update(self.undo(), snapshot, item.flags, item.undo).0)
            })?
            .ok_or(crate::Error::ItemNotFound(otid))?;

        if state != UpdateResult::Ok {
            return Ok((state, None));
        }

        // Phase 2: insert the new version at a fresh TID.
        let (tids, _) = self.insert_with(std::slice::from_ref(&new_value), None, xid, cid, None)?;
        let new_tid = tids.first().copied().expect("one item inserted");

        // Phase 3: point the old version at the new one.
        self.mark_old_updated(otid, new_tid, xid, cid, snapshot)?;

        Ok((UpdateResult::Ok, Some(new_tid)))
    }

    fn mark_old_updated(
        &self,
        otid: Tid,
        new_tid: Tid,
        xid: TxId,
        cid: CmdId,
        snapshot: &Snapshot,
    ) -> crate::Result<()> {
        self.with_fetched_exclusive(otid, |page, blk, item| {
            let (result, keep) =
                visibility::satisfies_update(self.undo(), snapshot, item.flags, item.undo);
            if result != UpdateResult::Ok {
                return Err(crate::Error::ConcurrentlyUpdated);
            }

            let undo_ptr = self.undo().insert(UndoRecord {
                kind: UndoKind::Update { new_tid },
                attno: self.attno,
                xid,
                cid,
                tid: otid,
                prev: if keep { item.undo } else { UndoPtr::INVALID },
            });

            let mut updated = item;
            updated.flags |= ItemFlags::UPDATED;
            updated.undo = undo_ptr;

            self.replace_item(page, blk, Some(otid), Some(Item::Single(updated)), Vec::new())
        })?
        .ok_or(crate::Error::ItemNotFound(otid))
    }

    /// Takes a tuple lock on `tid`, recording it in the undo log.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the TID does not exist, if the tuple is
    /// already deleted or moved by an update, or on structural
    /// corruption.
    pub fn lock_tuple(
        &self,
        tid: Tid,
        xid: TxId,
        cid: CmdId,
        mode: LockMode,
        snapshot: &Snapshot,
    ) -> crate::Result<UpdateResult> {
        self.with_fetched_exclusive(tid, |page, blk, item| {
            let (result, keep) =
                visibility::satisfies_update(self.undo(), snapshot, item.flags, item.undo);
            if result != UpdateResult::Ok {
                return Ok(result);
            }

            if item.flags.contains(ItemFlags::DELETED) {
                return Err(crate::Error::LockDeleted(tid));
            }
            if item.flags.contains(ItemFlags::UPDATED) {
                return Err(crate::Error::LockUpdated(tid));
            }

            let undo_ptr = self.undo().insert(UndoRecord {
                kind: UndoKind::TupleLock { mode },
                attno: self.attno,
                xid,
                cid,
                tid,
                prev: if keep { item.undo } else { UndoPtr::INVALID },
            });

            // Identical item, only the undo pointer moves.
            let mut locked = item;
            locked.undo = undo_ptr;

            self.replace_item(page, blk, Some(tid), Some(Item::Single(locked)), Vec::new())?;

            Ok(UpdateResult::Ok)
        })?
        .ok_or(crate::Error::ItemNotFound(tid))
    }

    /// Marks the tuple at `tid` dead (vacuum).
    ///
    /// The tuple becomes invisible to every snapshot and is physically
    /// removed by the next recompression of its leaf once `undo_ptr`
    /// falls behind the undo log's discard horizon. Marking an
    /// already-dead or missing tuple is a no-op.
    ///
    /// # Errors
    ///
    /// Will return `Err` on structural corruption.
    pub fn mark_dead(&self, tid: Tid, undo_ptr: UndoPtr) -> crate::Result<()> {
        let found = self.with_fetched_exclusive(tid, |page, blk, item| {
            if item.flags.contains(ItemFlags::DEAD) {
                return Ok(());
            }

            let dead = SingleItem {
                tid,
                flags: ItemFlags::DEAD,
                undo: undo_ptr,
                payload: Slice::empty(),
            };

            self.replace_item(page, blk, Some(tid), Some(Item::Single(dead)), Vec::new())
        })?;

        if found.is_none() {
            log::warn!(
                "could not find tuple to remove at tid {tid} for attribute {}",
                self.attno,
            );
        }

        Ok(())
    }

    /// One past the rightmost TID in the tree.
    ///
    /// This is the TID the next [`Tree::insert`] will assign first.
    /// Creates the tree if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Will return `Err` on structural corruption.
    pub fn last_tid(&self) -> crate::Result<Tid> {
        let root = self
            .meta()
            .root_or_create(self.attno, &self.spec, self.pool())?;

        self.with_leaf_shared(root, Tid::MAX, |page, _blk| {
            Ok(match last_item(page)? {
                Some(item) => item.last_tid().next(),
                None => page.lokey(),
            })
        })
    }

    /// Descends to the leaf containing `tid`, locks it exclusively,
    /// and hands the covering item (materialized as a Single) to `f`.
    ///
    /// Returns `Ok(None)` without calling `f` if the tree or the item
    /// does not exist.
    fn with_fetched_exclusive<R>(
        &self,
        tid: Tid,
        f: impl FnOnce(&mut PageBuf, BlockId, SingleItem) -> crate::Result<R>,
    ) -> crate::Result<Option<R>> {
        let Some(root) = self.meta().root(self.attno) else {
            return Ok(None);
        };

        self.with_leaf_exclusive(root, tid, |page, blk| {
            match self.find_covering_single(page, tid)? {
                None => Ok(None),
                Some(item) => f(page, blk, item).map(Some),
            }
        })
    }
}

/// Decodes the last (rightmost) item of a leaf page.
fn last_item(page: &PageBuf) -> crate::Result<Option<Item>> {
    let count = page.item_count();
    if count == 0 {
        return Ok(None);
    }

    let mut bytes = page.item_bytes(count - 1);
    Ok(Some(Item::decode_from(&mut bytes)?))
}
