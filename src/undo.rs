// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The undo log.
//!
//! Every write stamps the item it produces with a pointer into this
//! log. Visibility checks follow the pointer (and the record's `prev`
//! chain) to decide whether a snapshot sees the item. The log is
//! append-only; a vacuum-like caller advances the discard horizon,
//! after which old pointers dangle and their items count as visible to
//! everyone (or as prunable, if they are DEAD).

use crate::{
    visibility::{CmdId, TxId},
    AttrNo, Tid,
};
use std::collections::VecDeque;
use std::sync::Mutex;

/// A pointer into the undo log.
///
/// Undo pointers are monotonically increasing counters; zero means
/// "no undo record".
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UndoPtr(u64);

impl UndoPtr {
    /// The "no undo record" sentinel.
    pub const INVALID: Self = Self(0);

    /// Wraps a raw counter value.
    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw counter value.
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Whether this points at a record (valid pointers may still be
    /// behind the discard horizon).
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.0 > 0
    }
}

impl std::fmt::Display for UndoPtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tuple lock strength, recorded for lock undo records.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LockMode {
    /// Shared lock (readers that want to pin a row version).
    Share,

    /// Exclusive lock (select-for-update style).
    Exclusive,
}

/// What kind of write produced an undo record.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UndoKind {
    /// A bulk insert covering the contiguous TID range
    /// `[record.tid, end_tid]`.
    Insert {
        /// Last TID of the inserted range.
        end_tid: Tid,
    },

    /// A delete of one tuple.
    Delete,

    /// An update of one tuple; the new row version lives at `new_tid`.
    Update {
        /// TID of the replacement row version.
        new_tid: Tid,
    },

    /// A tuple lock.
    TupleLock {
        /// Strength of the lock taken.
        mode: LockMode,
    },
}

/// One undo record.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct UndoRecord {
    /// What kind of write this is.
    pub kind: UndoKind,

    /// Attribute whose tree was written.
    pub attno: AttrNo,

    /// Transaction that performed the write.
    pub xid: TxId,

    /// Command within the transaction.
    pub cid: CmdId,

    /// First (or only) TID the write covers.
    pub tid: Tid,

    /// The item's previous undo pointer, chaining older versions.
    /// Invalid if the chain was erased.
    pub prev: UndoPtr,
}

struct UndoLogInner {
    /// Counter value of the first retained record.
    base: u64,

    records: VecDeque<UndoRecord>,
}

/// An append-only, in-memory undo log shared by all trees of a store.
pub struct UndoLog {
    inner: Mutex<UndoLogInner>,
}

impl Default for UndoLog {
    fn default() -> Self {
        Self {
            inner: Mutex::new(UndoLogInner {
                base: 1,
                records: VecDeque::new(),
            }),
        }
    }
}

impl UndoLog {
    /// Appends a record, returning its pointer.
    pub fn insert(&self, record: UndoRecord) -> UndoPtr {
        let mut inner = self.inner.lock().expect("lock is poisoned");
        let ptr = UndoPtr(inner.base + inner.records.len() as u64);
        inner.records.push_back(record);
        ptr
    }

    /// Looks up a record; `None` if the pointer is invalid or behind
    /// the discard horizon.
    #[must_use]
    pub fn lookup(&self, ptr: UndoPtr) -> Option<UndoRecord> {
        if !ptr.is_valid() {
            return None;
        }

        let inner = self.inner.lock().expect("lock is poisoned");
        let idx = ptr.0.checked_sub(inner.base)?;
        inner.records.get(usize::try_from(idx).ok()?).copied()
    }

    /// The oldest still-reachable undo pointer.
    ///
    /// DEAD items whose pointer is older than this can be physically
    /// removed during recompression.
    #[must_use]
    pub fn oldest_ptr(&self) -> UndoPtr {
        let inner = self.inner.lock().expect("lock is poisoned");
        UndoPtr(inner.base)
    }

    /// Discards all records older than `ptr`, advancing the horizon.
    pub fn discard_up_to(&self, ptr: UndoPtr) {
        let mut inner = self.inner.lock().expect("lock is poisoned");

        while inner.base < ptr.0 && !inner.records.is_empty() {
            inner.records.pop_front();
            inner.base += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn rec(tid: u64) -> UndoRecord {
        UndoRecord {
            kind: UndoKind::Delete,
            attno: 1,
            xid: 1,
            cid: 0,
            tid: Tid::new(tid),
            prev: UndoPtr::INVALID,
        }
    }

    #[test]
    fn pointers_are_monotone() {
        let log = UndoLog::default();
        let a = log.insert(rec(1));
        let b = log.insert(rec(2));
        assert!(a < b);
        assert_eq!(Tid::new(1), log.lookup(a).expect("retained").tid);
        assert_eq!(Tid::new(2), log.lookup(b).expect("retained").tid);
    }

    #[test]
    fn discard_advances_horizon() {
        let log = UndoLog::default();
        let a = log.insert(rec(1));
        let b = log.insert(rec(2));

        assert_eq!(log.oldest_ptr(), a);
        log.discard_up_to(b);
        assert_eq!(log.oldest_ptr(), b);
        assert!(log.lookup(a).is_none());
        assert!(log.lookup(b).is_some());
        assert!(log.lookup(UndoPtr::INVALID).is_none());
    }
}
