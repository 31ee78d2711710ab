// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Single-TID lookup.

use super::Tree;
use crate::{
    coding::Decode,
    compress::Decompressor,
    datum,
    item::{Item, ItemFlags, SingleItem},
    page::PageBuf,
    visibility, Datum, Slice, Snapshot, Tid,
};

impl Tree {
    /// Fetches the value at `tid` under `snapshot`.
    ///
    /// Returns `None` if there is no tuple visible to the snapshot at
    /// this TID; `Some(None)` is a visible SQL NULL.
    ///
    /// # Errors
    ///
    /// Will return `Err` on structural corruption.
    pub fn fetch(&self, tid: Tid, snapshot: &Snapshot) -> crate::Result<Option<Datum>> {
        let Some(root) = self.meta().root(self.attno) else {
            return Ok(None);
        };

        self.with_leaf_shared(root, tid, |page, _blk| {
            let Some(item) = self.find_covering_single(page, tid)? else {
                return Ok(None);
            };

            if !visibility::satisfies_visibility(self.undo(), snapshot, item.flags, item.undo) {
                return Ok(None);
            }

            Ok(Some(self.single_value(&item)))
        })
    }

    /// Finds the item covering `tid` on a leaf and materializes it as
    /// a Single: decompresses a covering compressed batch, copies the
    /// requested element out of a covering array.
    pub(crate) fn find_covering_single(
        &self,
        page: &PageBuf,
        tid: Tid,
    ) -> crate::Result<Option<SingleItem>> {
        for i in 0..page.item_count() {
            let mut bytes = page.item_bytes(i);
            let item = Item::decode_from(&mut bytes)?;

            if !item.covers(tid) {
                continue;
            }

            if let Item::Compressed(citem) = &item {
                let mut decompressor = Decompressor::chunk(citem)?;

                while let Some(inner) = decompressor.read_item()? {
                    if inner.covers(tid) {
                        return self.materialize_single(inner, tid).map(Some);
                    }
                }

                // The batch covers the TID range but no contained item
                // holds this TID; sibling items cannot either.
                return Ok(None);
            }

            return self.materialize_single(item, tid).map(Some);
        }

        Ok(None)
    }

    fn materialize_single(&self, item: Item, tid: Tid) -> crate::Result<SingleItem> {
        match item {
            Item::Single(single) => {
                debug_assert_eq!(tid, single.tid);
                Ok(single)
            }

            Item::Array(array) => {
                let element = usize::try_from(tid.offset_from(array.first_tid))
                    .expect("array length fits in usize");

                let payload = if array.flags.contains(ItemFlags::NULL) {
                    Slice::empty()
                } else {
                    let offset = array.element_offset(&self.spec, element);
                    let bytes = array
                        .payload
                        .get(offset..)
                        .expect("element within payload");
                    let size = datum::stored_size(&self.spec, bytes);
                    Slice::from(bytes.get(..size).expect("datum within payload"))
                };

                Ok(SingleItem {
                    tid,
                    flags: array.flags - ItemFlags::ARRAY,
                    undo: array.undo,
                    payload,
                })
            }

            Item::Compressed(_) => Err(crate::Error::NestedCompression),
        }
    }

    /// The caller-facing value of a materialized Single: `None` for
    /// NULL, otherwise the raw bytes with any varlena header stripped.
    pub(crate) fn single_value(&self, item: &SingleItem) -> Datum {
        if item.flags.contains(ItemFlags::NULL) {
            return None;
        }

        let range = datum::value_range(&self.spec, &item.payload);
        Some(Slice::from(
            item.payload.get(range).expect("value within payload"),
        ))
    }
}
