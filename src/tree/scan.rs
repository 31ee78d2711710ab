// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The forward leaf scanner.
//!
//! A scan pulls one TID at a time, in strictly increasing order. It
//! keeps its current leaf pinned between calls but only share-locks
//! it while walking the item array; anything it emits or iterates
//! (array payloads, decompressed batches) is copied into scan-owned
//! state first, so the lock is never held across a yield. Concurrent
//! writers may rewrite or split the leaf between calls; the low-key /
//! right-link invariants guarantee the scan neither skips nor
//! duplicates a TID.

use super::Tree;
use crate::{
    buffer::{lock_shared, BlockId, PageHandle},
    coding::Decode,
    compress::Decompressor,
    datum,
    item::{ArrayItem, Item, ItemFlags},
    page::PAGE_KIND_BTREE,
    visibility::{satisfies_visibility, Snapshot},
    AttrSpec, Datum, Slice, Tid,
};

/// Iteration state inside one array item. The payload is a copy, so
/// no page lock is needed while elements are emitted.
struct ArrayCursor {
    payload: Slice,
    pos: usize,
    next_tid: Tid,
    remaining: u16,
    isnull: bool,
}

impl ArrayCursor {
    /// Installs a cursor over `item`, skipped forward to `skip_to`.
    fn new(attr: &AttrSpec, item: ArrayItem, skip_to: Tid) -> Self {
        let mut cursor = Self {
            isnull: item.flags.contains(ItemFlags::NULL),
            payload: item.payload,
            pos: 0,
            next_tid: item.first_tid,
            remaining: item.nelements,
        };

        while cursor.next_tid < skip_to && cursor.remaining > 0 {
            if !cursor.isnull {
                cursor.pos += datum::stored_size(
                    attr,
                    cursor.payload.get(cursor.pos..).expect("element within payload"),
                );
            }
            cursor.next_tid = cursor.next_tid.next();
            cursor.remaining -= 1;
        }

        cursor
    }

    /// Emits the element under the cursor and advances.
    fn emit(&mut self, attr: &AttrSpec) -> (Tid, Datum) {
        debug_assert!(self.remaining > 0);

        let tid = self.next_tid;

        let value = if self.isnull {
            None
        } else {
            let bytes = self.payload.get(self.pos..).expect("element within payload");
            let size = datum::stored_size(attr, bytes);
            let range = datum::value_range(attr, bytes);
            self.pos += size;

            Some(Slice::from(bytes.get(range).expect("value within payload")))
        };

        self.next_tid = tid.next();
        self.remaining -= 1;

        (tid, value)
    }
}

enum Step {
    Emit(Tid, Datum),
    GoRight(BlockId),
    End,
    Again,
}

/// A forward scan over one attribute tree.
///
/// Created by [`Tree::scan`]. Implements [`Iterator`] yielding
/// `(Tid, Datum)` pairs in strictly increasing TID order. Dropping
/// the scan releases its page pin and decompression buffer.
pub struct Scan {
    tree: Tree,
    snapshot: Snapshot,

    active: bool,

    /// Current leaf, pinned across calls.
    lastbuf: Option<(BlockId, PageHandle)>,

    /// Scan cursor: the smallest TID not yet produced.
    nexttid: Tid,

    decompressor: Option<Decompressor>,
    array: Option<ArrayCursor>,
}

impl Scan {
    pub(crate) fn new(tree: &Tree, start: Tid, snapshot: Snapshot) -> crate::Result<Self> {
        let Some(root) = tree.meta().root(tree.attno) else {
            // completely empty tree
            return Ok(Self {
                tree: tree.clone(),
                snapshot,
                active: false,
                lastbuf: None,
                nexttid: start,
                decompressor: None,
                array: None,
            });
        };

        let blk = tree.descend_to_leaf(root, start)?;
        let handle = tree.pool().get(blk)?;

        Ok(Self {
            tree: tree.clone(),
            snapshot,
            active: true,
            lastbuf: Some((blk, handle)),
            nexttid: start,
            decompressor: None,
            array: None,
        })
    }

    /// Produces the next visible `(tid, value)` pair, or `None` at
    /// the end of the tree.
    ///
    /// # Errors
    ///
    /// Will return `Err` on structural corruption.
    pub fn next_row(&mut self) -> crate::Result<Option<(Tid, Datum)>> {
        if !self.active {
            return Ok(None);
        }

        loop {
            // 1. Mid-array: emit the element under the cursor.
            if let Some(cursor) = &mut self.array {
                if cursor.remaining > 0 {
                    let (tid, value) = cursor.emit(&self.tree.spec);
                    self.nexttid = cursor.next_tid;
                    return Ok(Some((tid, value)));
                }
                self.array = None;
            }

            // 2. Mid-batch: pull the next item out of the
            //    decompression buffer.
            if self.decompressor.is_some() {
                let inner = self
                    .decompressor
                    .as_mut()
                    .expect("just checked")
                    .read_item()?;

                let Some(item) = inner else {
                    self.decompressor = None;
                    continue;
                };

                let last = item.last_tid();
                if last < self.nexttid {
                    continue;
                }

                if !satisfies_visibility(
                    self.tree.undo(),
                    &self.snapshot,
                    item.flags(),
                    item.undo_ptr(),
                ) {
                    self.nexttid = last.next();
                    continue;
                }

                match item {
                    Item::Array(array) => {
                        // The buffer is already a copy; iterate it.
                        let cursor = ArrayCursor::new(&self.tree.spec, array, self.nexttid);
                        self.nexttid = cursor.next_tid;
                        if cursor.remaining > 0 {
                            self.array = Some(cursor);
                        }
                        continue;
                    }
                    Item::Single(single) => {
                        let value = self.tree.single_value(&single);
                        self.nexttid = single.tid.next();
                        return Ok(Some((single.tid, value)));
                    }
                    Item::Compressed(_) => return Err(crate::Error::NestedCompression),
                }
            }

            // 3. Walk the current leaf for the next item.
            let Some((blk, handle)) = self.lastbuf.clone() else {
                self.active = false;
                return Ok(None);
            };

            let step = {
                let page = lock_shared(&handle);
                debug_assert_eq!(PAGE_KIND_BTREE, page.kind());
                debug_assert_eq!(0, page.level());

                let mut chosen: Option<Step> = None;

                // TODO: start from the remembered offset of the last
                // call instead of offset 0
                for i in 0..page.item_count() {
                    let mut bytes = page.item_bytes(i);
                    let item = Item::decode_from(&mut bytes)?;

                    let last = item.last_tid();
                    if last < self.nexttid {
                        continue;
                    }

                    match item {
                        Item::Compressed(citem) => {
                            // Copy into the scan-owned buffer, then
                            // get off the page.
                            self.decompressor = Some(Decompressor::chunk(&citem)?);
                            chosen = Some(Step::Again);
                            break;
                        }
                        Item::Array(array) => {
                            if !satisfies_visibility(
                                self.tree.undo(),
                                &self.snapshot,
                                array.flags,
                                array.undo,
                            ) {
                                self.nexttid = last.next();
                                continue;
                            }

                            // Copy the payload; the page lock drops
                            // before elements are emitted.
                            let cursor =
                                ArrayCursor::new(&self.tree.spec, array, self.nexttid);
                            self.nexttid = cursor.next_tid;
                            if cursor.remaining > 0 {
                                self.array = Some(cursor);
                                chosen = Some(Step::Again);
                                break;
                            }
                        }
                        Item::Single(single) => {
                            if !satisfies_visibility(
                                self.tree.undo(),
                                &self.snapshot,
                                single.flags,
                                single.undo,
                            ) {
                                self.nexttid = last.next();
                                continue;
                            }

                            let value = self.tree.single_value(&single);
                            self.nexttid = single.tid.next();
                            chosen = Some(Step::Emit(single.tid, value));
                            break;
                        }
                    }
                }

                match chosen {
                    Some(step) => step,
                    None => {
                        // No more items here; walk right.
                        let right = page.next();
                        if right == blk {
                            return Err(crate::Error::RightLinkSelfLoop(blk));
                        }

                        if right.is_valid() {
                            Step::GoRight(right)
                        } else {
                            Step::End
                        }
                    }
                }
            };

            match step {
                Step::Again => {}
                Step::Emit(tid, value) => return Ok(Some((tid, value))),
                Step::GoRight(right) => {
                    self.lastbuf = Some((right, self.tree.pool().get(right)?));
                }
                Step::End => {
                    self.active = false;
                    self.lastbuf = None;
                    return Ok(None);
                }
            }
        }
    }
}

impl Iterator for Scan {
    type Item = crate::Result<(Tid, Datum)>;

    fn next(&mut self) -> Option<Self::Item> {
        fail_iter!(self.next_row()).map(Ok)
    }
}
