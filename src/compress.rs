// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Item batch compression.
//!
//! The recompressor feeds uncompressed items into a [`Compressor`]
//! sized to the free space of the page being built; the compressor
//! accepts items until the LZ4 output would no longer fit. Readers go
//! the other way: [`Decompressor`] inflates one compressed item into
//! an owned buffer and yields the contained items one by one, so the
//! caller can drop the page lock while it consumes them.

use crate::{
    coding::{Decode, Encode},
    item::{CompressedItem, Item, COMPRESSED_OVERHEAD},
    Checksum, Tid,
};

/// Accumulates items into one LZ4-compressed batch under a byte
/// budget.
pub struct Compressor {
    budget: usize,
    buf: Vec<u8>,
    first_tid: Tid,
    last_tid: Tid,
    items: usize,
}

impl Compressor {
    /// Starts a batch that must encode into at most `budget` bytes.
    #[must_use]
    pub fn begin(budget: usize) -> Self {
        Self {
            budget,
            buf: Vec::new(),
            first_tid: Tid::INVALID,
            last_tid: Tid::INVALID,
            items: 0,
        }
    }

    /// Whether no item was accepted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items == 0
    }

    /// Tries to add an item to the batch.
    ///
    /// Returns `false` (leaving the batch unchanged) if the compressed
    /// result would exceed the budget. Compressed items can not be
    /// nested.
    pub fn add(&mut self, item: &Item) -> bool {
        debug_assert!(!matches!(item, Item::Compressed(_)));

        let rollback = self.buf.len();
        item.encode_into(&mut self.buf).expect("cannot fail");

        let compressed = lz4_flex::compress_prepend_size(&self.buf);
        if COMPRESSED_OVERHEAD + compressed.len() > self.budget {
            self.buf.truncate(rollback);
            return false;
        }

        if self.items == 0 {
            self.first_tid = item.first_tid();
        }
        self.last_tid = item.last_tid();
        self.items += 1;

        true
    }

    /// Seals the batch into a compressed item; `None` if it is empty.
    #[must_use]
    pub fn finish(self) -> Option<CompressedItem> {
        if self.items == 0 {
            return None;
        }

        let payload = lz4_flex::compress_prepend_size(&self.buf);

        Some(CompressedItem {
            first_tid: self.first_tid,
            last_tid: self.last_tid,
            #[allow(clippy::cast_possible_truncation)]
            uncompressed_size: self.buf.len() as u32,
            checksum: Checksum::of(&self.buf),
            payload: payload.into(),
        })
    }
}

/// Inflates one compressed item and yields the items packed inside.
///
/// Owns its buffer, so it stays valid after the originating page is
/// unlocked.
pub struct Decompressor {
    buf: Vec<u8>,
    pos: usize,
}

impl Decompressor {
    /// Decompresses `item`, verifying size and checksum.
    ///
    /// # Errors
    ///
    /// Fails on malformed LZ4 data or a checksum mismatch.
    pub fn chunk(item: &CompressedItem) -> crate::Result<Self> {
        let buf = lz4_flex::decompress_size_prepended(&item.payload)
            .map_err(|_| crate::Error::Decompress)?;

        if buf.len() != item.uncompressed_size as usize {
            return Err(crate::Error::Decompress);
        }
        Checksum::of(&buf).check(item.checksum)?;

        Ok(Self { buf, pos: 0 })
    }

    /// Reads the next contained item; `None` once exhausted.
    ///
    /// # Errors
    ///
    /// Fails on a malformed item, or if a nested compressed item is
    /// encountered (compression does not nest).
    pub fn read_item(&mut self) -> crate::Result<Option<Item>> {
        if self.pos >= self.buf.len() {
            return Ok(None);
        }

        let mut reader = self.buf.get(self.pos..).expect("pos within buffer");
        let item = Item::decode_from(&mut reader)?;
        self.pos += item.encoded_size();

        if matches!(item, Item::Compressed(_)) {
            return Err(crate::Error::NestedCompression);
        }

        Ok(Some(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        item::{create_item, Payload},
        undo::UndoPtr,
        AttrLen, AttrSpec, Slice,
    };
    use test_log::test;

    fn fixed8() -> AttrSpec {
        AttrSpec::new(AttrLen::Fixed(8), true)
    }

    fn int_item(tid: u64, value: u64) -> Item {
        create_item(
            &fixed8(),
            Tid::new(tid),
            UndoPtr::INVALID,
            1,
            Payload::Values(&[Slice::from(value.to_le_bytes())]),
            false,
        )
    }

    #[test]
    fn roundtrip_batch() -> crate::Result<()> {
        let mut compressor = Compressor::begin(8000);
        for tid in 1..=100u64 {
            assert!(compressor.add(&int_item(tid, tid * 10)));
        }

        let citem = compressor.finish().expect("batch is non-empty");
        assert_eq!(Tid::new(1), citem.first_tid);
        assert_eq!(Tid::new(100), citem.last_tid);

        let mut decompressor = Decompressor::chunk(&citem)?;
        let mut tid = 1u64;
        while let Some(item) = decompressor.read_item()? {
            assert_eq!(Tid::new(tid), item.first_tid());
            tid += 1;
        }
        assert_eq!(101, tid);

        Ok(())
    }

    #[test]
    fn budget_is_respected() {
        let mut compressor = Compressor::begin(200);

        let mut accepted = 0;
        for tid in 1..=1000u64 {
            // incompressible-ish: mix the counter into every byte
            if !compressor.add(&int_item(tid, tid.wrapping_mul(0x9E37_79B9_7F4A_7C15))) {
                break;
            }
            accepted += 1;
        }

        assert!(accepted > 0, "at least one small item fits 200 bytes");
        assert!(accepted < 1000, "budget must eventually reject");

        let citem = compressor.finish().expect("non-empty");
        assert!(COMPRESSED_OVERHEAD + citem.payload.len() <= 200);
    }

    #[test]
    fn empty_batch_finishes_to_none() {
        assert!(Compressor::begin(100).finish().is_none());
    }

    #[test]
    fn corruption_is_detected() -> crate::Result<()> {
        let mut compressor = Compressor::begin(8000);
        assert!(compressor.add(&int_item(1, 1)));
        let mut citem = compressor.finish().expect("non-empty");

        citem.checksum = Checksum::from_raw(citem.checksum.into_u64() ^ 1);
        assert!(Decompressor::chunk(&citem).is_err());

        Ok(())
    }
}
