// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The recompressor.
//!
//! Takes the ordered logical item list that should become a leaf's
//! content and lays it out physically: uncompressed items are batched
//! into the compressor sized to the current page's free space,
//! already-compressed batches pass through untouched, and DEAD items
//! whose undo pointer fell behind the discard horizon are dropped.
//! When the items no longer fit one page, the leaf is split into as
//! many pages as needed, chained with right-links, and a downlink is
//! installed for every new sibling.

use super::Tree;
use crate::{
    buffer::{lock_exclusive, BlockId},
    coding::Encode,
    compress::Compressor,
    item::{Item, ItemFlags},
    page::{PageBuf, PAGE_KIND_BTREE},
    undo::UndoPtr,
    AttrNo, Tid,
};

struct RecompressContext {
    attno: AttrNo,

    /// The original page's high key; every page gets it tentatively
    /// and loses it again when it is sealed.
    hikey: Tid,

    pages: Vec<PageBuf>,
    compressor: Option<Compressor>,
}

impl RecompressContext {
    fn new(attno: AttrNo, lokey: Tid, hikey: Tid) -> Self {
        let mut ctx = Self {
            attno,
            hikey,
            pages: Vec::new(),
            compressor: None,
        };
        ctx.new_page(lokey);
        ctx
    }

    /// Seals the current page at `lokey` and opens the next one.
    fn new_page(&mut self, lokey: Tid) {
        if let Some(current) = self.pages.last_mut() {
            current.set_hikey(lokey);
        }

        self.pages
            .push(PageBuf::new(PAGE_KIND_BTREE, self.attno, 0, lokey, self.hikey));
    }

    fn current(&mut self) -> &mut PageBuf {
        self.pages.last_mut().expect("at least one page")
    }

    /// Places an item on the current page, sealing it and opening a
    /// new one if the item does not fit.
    fn add_to_page(&mut self, item: &Item) -> crate::Result<()> {
        let bytes = item.encode_into_vec();

        if !self.current().fits(bytes.len()) {
            self.new_page(item.first_tid());
        }

        self.current().push_item(&bytes)
    }

    /// Tries to add an item to the running compressor batch, starting
    /// a new batch sized to the current page's free space if none is
    /// running.
    fn add_to_compressor(&mut self, item: &Item) -> bool {
        let budget = self
            .pages
            .last()
            .expect("at least one page")
            .free_space();

        let compressor = match &mut self.compressor {
            Some(compressor) if !compressor.is_empty() => compressor,
            _ => self.compressor.insert(Compressor::begin(budget)),
        };

        compressor.add(item)
    }

    fn has_batch(&self) -> bool {
        self.compressor.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Finalizes the running batch onto the current page.
    fn flush(&mut self) -> crate::Result<()> {
        if let Some(compressor) = self.compressor.take() {
            if let Some(citem) = compressor.finish() {
                self.add_to_page(&Item::Compressed(citem))?;
            }
        }

        Ok(())
    }
}

impl Tree {
    /// Replaces the leaf's content with `items`, re-running the
    /// compressor, pruning old-enough DEAD items, and splitting into
    /// multiple pages when necessary.
    ///
    /// On entry `page` is the exclusive-locked leaf at `blk`; the
    /// first rebuilt page overwrites it in place, further pages get
    /// freshly allocated blocks chained via right-links (raising
    /// FOLLOW_RIGHT until their downlink is installed).
    pub(crate) fn recompress_replace(
        &self,
        page: &mut PageBuf,
        blk: BlockId,
        items: Vec<Item>,
    ) -> crate::Result<()> {
        debug_assert_eq!(0, page.level());

        let mut ctx = RecompressContext::new(self.attno, page.lokey(), page.hikey());
        let mut discard_horizon: Option<UndoPtr> = None;

        for item in &items {
            if item.flags().contains(ItemFlags::DEAD) {
                let horizon =
                    *discard_horizon.get_or_insert_with(|| self.undo().oldest_ptr());

                if item.undo_ptr() < horizon {
                    continue;
                }
            }

            if matches!(item, Item::Compressed(_)) {
                // Already compressed; keep as-is, in order.
                ctx.flush()?;
                ctx.add_to_page(item)?;
            } else if !ctx.add_to_compressor(item) {
                if ctx.has_batch() {
                    ctx.flush()?;

                    if !ctx.add_to_compressor(item) {
                        // Does not compress into the budget even on
                        // its own; store it uncompressed.
                        ctx.add_to_page(item)?;
                    }
                } else {
                    ctx.add_to_page(item)?;
                }
            }
        }

        ctx.flush()?;

        let built = ctx.pages;
        let npages = built.len();
        let orig_next = page.next();

        // Allocate blocks for the new right siblings up front; they
        // are invisible until the old page's right-link is rewritten.
        let mut blocks = vec![blk];
        let mut handles = vec![None];
        for _ in 1..npages {
            let (new_blk, handle) = self.pool().allocate();
            blocks.push(new_blk);
            handles.push(Some(handle));
        }

        let lokeys: Vec<Tid> = built.iter().map(PageBuf::lokey).collect();

        for (i, mut newpage) in built.into_iter().enumerate() {
            if let Some(right) = blocks.get(i + 1) {
                newpage.set_next(*right);
                newpage.raise_follow_right();
            } else {
                newpage.set_next(orig_next);
            }

            if i == 0 {
                page.replace_with(newpage);
            } else {
                let handle = handles.get(i).and_then(Option::as_ref).expect("allocated");
                *lock_exclusive(handle) = newpage;
            }
        }

        if npages > 1 {
            log::debug!(
                "leaf {blk} of attribute {} recompressed into {npages} pages",
                self.attno,
            );

            // Parent each new sibling, left to right. The first left
            // page is the caller's; later ones are re-locked here.
            self.insert_downlink(
                page,
                blk,
                *lokeys.get(1).expect("second page exists"),
                *blocks.get(1).expect("second page exists"),
            )?;

            for i in 1..npages - 1 {
                let handle = handles
                    .get(i)
                    .and_then(Option::as_ref)
                    .expect("allocated")
                    .clone();
                let mut left = lock_exclusive(&handle);

                self.insert_downlink(
                    &mut left,
                    *blocks.get(i).expect("in range"),
                    *lokeys.get(i + 1).expect("in range"),
                    *blocks.get(i + 1).expect("in range"),
                )?;
            }
        }

        Ok(())
    }
}
