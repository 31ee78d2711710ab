// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Snapshot visibility.
//!
//! The tree itself never interprets transaction state; it stores undo
//! pointers and asks this module whether a given item is visible to a
//! snapshot, or whether it may be overwritten by a mutation. The
//! snapshot model is deliberately small: a transaction id is visible
//! if it committed at or before the snapshot's horizon, or if it is
//! the snapshot's own transaction.

use crate::{
    item::ItemFlags,
    undo::{UndoKind, UndoLog, UndoPtr},
};

/// Transaction identifier.
pub type TxId = u64;

/// Command identifier within a transaction.
pub type CmdId = u32;

/// A point-in-time view used to filter row versions.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    /// The observing transaction.
    pub xid: TxId,

    /// Highest committed transaction id visible to this snapshot.
    pub horizon: TxId,
}

impl Snapshot {
    /// Creates a snapshot.
    #[must_use]
    pub fn new(xid: TxId, horizon: TxId) -> Self {
        Self { xid, horizon }
    }

    fn sees(&self, xid: TxId) -> bool {
        xid == self.xid || xid <= self.horizon
    }
}

/// Outcome of checking whether a tuple may be deleted, updated or
/// locked.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UpdateResult {
    /// The tuple is visible and unmodified; go ahead.
    Ok,

    /// The tuple's inserting transaction is not visible.
    Invisible,

    /// The tuple was already modified by the snapshot's own
    /// transaction.
    SelfModified,

    /// A visible transaction already moved the tuple elsewhere.
    Updated,

    /// A visible transaction already deleted the tuple.
    Deleted,

    /// An in-progress foreign transaction holds the tuple.
    BeingModified,
}

/// Whether `snapshot` sees the item with the given flags and undo
/// pointer.
pub(crate) fn satisfies_visibility(
    undo: &UndoLog,
    snapshot: &Snapshot,
    flags: ItemFlags,
    ptr: UndoPtr,
) -> bool {
    if flags.contains(ItemFlags::DEAD) {
        return false;
    }

    let gone = flags.intersects(ItemFlags::DELETED | ItemFlags::UPDATED);

    match undo.lookup(ptr) {
        // Behind the discard horizon: an ancient insert is visible to
        // everyone, an ancient delete/update means the tuple is gone.
        None => !gone,

        Some(head) => {
            if gone {
                if snapshot.sees(head.xid) {
                    false
                } else {
                    insert_visible(undo, snapshot, head.prev)
                }
            } else {
                insert_visible(undo, snapshot, ptr)
            }
        }
    }
}

/// Walks the undo chain down to the insert record and checks it
/// against the snapshot. A chain that ends behind the discard horizon
/// is old enough to be visible to everyone.
fn insert_visible(undo: &UndoLog, snapshot: &Snapshot, mut ptr: UndoPtr) -> bool {
    loop {
        match undo.lookup(ptr) {
            None => return true,
            Some(rec) => match rec.kind {
                UndoKind::Insert { .. } => return snapshot.sees(rec.xid),
                _ => ptr = rec.prev,
            },
        }
    }
}

/// Whether the item may be deleted/updated/locked by `snapshot`'s
/// transaction.
///
/// Also reports whether the item's current undo pointer should be
/// chained into the new record (`false` once the chain fell behind the
/// discard horizon).
pub(crate) fn satisfies_update(
    undo: &UndoLog,
    snapshot: &Snapshot,
    flags: ItemFlags,
    ptr: UndoPtr,
) -> (UpdateResult, bool) {
    if flags.contains(ItemFlags::DEAD) {
        return (UpdateResult::Invisible, false);
    }

    let Some(head) = undo.lookup(ptr) else {
        let result = if flags.contains(ItemFlags::DELETED) {
            UpdateResult::Deleted
        } else if flags.contains(ItemFlags::UPDATED) {
            UpdateResult::Updated
        } else {
            UpdateResult::Ok
        };
        return (result, false);
    };

    let insert_ptr = if flags.intersects(ItemFlags::DELETED | ItemFlags::UPDATED) {
        head.prev
    } else {
        ptr
    };

    if !insert_visible(undo, snapshot, insert_ptr) {
        return (UpdateResult::Invisible, true);
    }

    let result = if flags.contains(ItemFlags::DELETED) {
        if head.xid == snapshot.xid {
            UpdateResult::SelfModified
        } else if snapshot.sees(head.xid) {
            UpdateResult::Deleted
        } else {
            UpdateResult::BeingModified
        }
    } else if flags.contains(ItemFlags::UPDATED) {
        if head.xid == snapshot.xid {
            UpdateResult::SelfModified
        } else if snapshot.sees(head.xid) {
            UpdateResult::Updated
        } else {
            UpdateResult::BeingModified
        }
    } else if matches!(head.kind, UndoKind::TupleLock { .. }) && !snapshot.sees(head.xid) {
        UpdateResult::BeingModified
    } else {
        UpdateResult::Ok
    };

    (result, true)
}
