// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The logical leaf edit behind insert, delete, update, lock and
//! vacuum.

use super::Tree;
use crate::{buffer::BlockId, coding::Decode, compress::Decompressor, item::Item, page::PageBuf, Tid};

impl Tree {
    /// Rewrites the leaf's item list: the item at `old_tid` (if given)
    /// is replaced by `replacement` (`None` removes it), and
    /// `new_items` are appended at the end.
    ///
    /// A compressed batch covering `old_tid` is decompressed inline so
    /// the edit applies to its contained items; an array covering
    /// `old_tid` is split around the target element. The caller must
    /// arrange for `new_items` to sort after everything on the page —
    /// bulk insert targets the rightmost leaf and assigns TIDs past
    /// its last item, so this holds in every caller.
    ///
    /// The physical layout, including compression and page splits, is
    /// left to the recompressor.
    pub(crate) fn replace_item(
        &self,
        page: &mut PageBuf,
        blk: BlockId,
        old_tid: Option<Tid>,
        mut replacement: Option<Item>,
        new_items: Vec<Item>,
    ) -> crate::Result<()> {
        if let (Some(old), Some(item)) = (old_tid, &replacement) {
            debug_assert_eq!(old, item.first_tid());
        }

        let mut items: Vec<Item> = Vec::new();
        let mut found = false;

        for i in 0..page.item_count() {
            let mut bytes = page.item_bytes(i);
            let item = Item::decode_from(&mut bytes)?;

            if let (Some(old), Item::Compressed(citem)) = (old_tid, &item) {
                if item.covers(old) {
                    // The edit lands inside this batch: pivot to the
                    // decompressor and edit the contained items.
                    let mut decompressor = Decompressor::chunk(citem)?;

                    while let Some(inner) = decompressor.read_item()? {
                        self.apply_edit(&mut items, inner, old_tid, &mut replacement, &mut found);
                    }

                    continue;
                }
            }

            self.apply_edit(&mut items, item, old_tid, &mut replacement, &mut found);
        }

        if let Some(old) = old_tid {
            if !found {
                return Err(crate::Error::OldItemNotFound(old));
            }
        }

        if let (Some(last), Some(first)) = (items.last(), new_items.first()) {
            debug_assert!(
                last.last_tid() < first.first_tid(),
                "new items must sort after the existing page content",
            );
        }
        items.extend(new_items);

        self.recompress_replace(page, blk, items)
    }

    /// Routes one item into the rewritten list, applying the edit at
    /// `old_tid` when the item covers it.
    fn apply_edit(
        &self,
        out: &mut Vec<Item>,
        item: Item,
        old_tid: Option<Tid>,
        replacement: &mut Option<Item>,
        found: &mut bool,
    ) {
        let Some(old) = old_tid else {
            out.push(item);
            return;
        };

        match item {
            Item::Array(array) if array.first_tid <= old && old <= last_of(&array) => {
                // Split the array around the target element.
                let nelements = usize::from(array.nelements);
                let cutoff = usize::try_from(old.offset_from(array.first_tid))
                    .expect("array length fits in usize");

                if cutoff > 0 {
                    #[allow(clippy::cast_possible_truncation)]
                    out.push(array.slice(&self.spec, 0, cutoff as u16, array.first_tid));
                }

                if let Some(item) = replacement.take() {
                    out.push(item);
                }

                if cutoff + 1 < nelements {
                    #[allow(clippy::cast_possible_truncation)]
                    out.push(array.slice(
                        &self.spec,
                        cutoff + 1,
                        (nelements - cutoff - 1) as u16,
                        old.next(),
                    ));
                }

                *found = true;
            }

            Item::Single(single) if single.tid == old => {
                debug_assert!(!*found);

                if let Some(item) = replacement.take() {
                    out.push(item);
                }
                *found = true;
            }

            other => out.push(other),
        }
    }
}

fn last_of(array: &crate::item::ArrayItem) -> Tid {
    Tid::new(array.first_tid.raw() + u64::from(array.nelements) - 1)
}
