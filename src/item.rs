// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Leaf items.
//!
//! A leaf page stores a sorted sequence of items. An item covers one
//! TID (Single), a contiguous run of TIDs with identical NULL-ness
//! (Array), or is an opaque compressed batch of other items
//! (Compressed). All three share a fixed header so the recompressor
//! and the scanner can dispatch on the flag bits.
//!
//! On-page layout (little-endian):
//!
//! ```text
//! common   first_tid u48 | size u16 | flags u16 | undo u64
//! Single   common | packed datum
//! Array    common | nelements u16 | packed datums
//! Compressed
//!          common | last_tid u48 | uncompressed_size u32
//!                 | checksum u64 | compressed bytes
//! ```
//!
//! `size` is the full encoded size, so a packed stream of items can be
//! walked without knowing their variants up front.

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    datum,
    tid::TID_WIDTH,
    undo::UndoPtr,
    AttrSpec, Checksum, Slice, Tid,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Encoded size of the common item header.
pub const ITEM_HEADER: usize = TID_WIDTH + 2 + 2 + 8;

/// Encoded overhead of an Array item.
pub const ARRAY_OVERHEAD: usize = ITEM_HEADER + 2;

/// Encoded overhead of a Compressed item.
pub const COMPRESSED_OVERHEAD: usize = ITEM_HEADER + TID_WIDTH + 4 + 8;

bitflags::bitflags! {
    /// Item flag bits, also the on-page variant discriminator.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct ItemFlags: u16 {
        /// The item is a compressed batch.
        const COMPRESSED = 1 << 0;

        /// The item is a packed run of datums.
        const ARRAY = 1 << 1;

        /// The covered datums are SQL NULL (payload is empty).
        const NULL = 1 << 2;

        /// The tuple was deleted; the undo pointer names the deleter.
        const DELETED = 1 << 3;

        /// The tuple was moved by an update; the undo pointer's record
        /// carries the new TID.
        const UPDATED = 1 << 4;

        /// Vacuum killed this tuple; it is visible to no one and is
        /// physically removed once its undo pointer falls behind the
        /// discard horizon.
        const DEAD = 1 << 5;
    }
}

/// An item covering exactly one TID.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SingleItem {
    /// The covered TID.
    pub tid: Tid,

    /// Flag bits (never `ARRAY` or `COMPRESSED`).
    pub flags: ItemFlags,

    /// Undo pointer of the latest write to this tuple.
    pub undo: UndoPtr,

    /// The packed datum; empty if NULL.
    pub payload: Slice,
}

/// An item covering the TID run `[first_tid, first_tid + nelements)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArrayItem {
    /// First covered TID.
    pub first_tid: Tid,

    /// Flag bits (always `ARRAY`).
    pub flags: ItemFlags,

    /// Undo pointer shared by all covered tuples.
    pub undo: UndoPtr,

    /// Number of covered TIDs.
    pub nelements: u16,

    /// Packed datums, back to back; empty if NULL.
    pub payload: Slice,
}

/// A compressed batch of Single/Array items.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressedItem {
    /// First TID of the first contained item.
    pub first_tid: Tid,

    /// Last TID of the last contained item.
    pub last_tid: Tid,

    /// Byte size of the contained items once decompressed.
    pub uncompressed_size: u32,

    /// Checksum of the decompressed bytes.
    pub checksum: Checksum,

    /// The compressed bytes.
    pub payload: Slice,
}

/// A leaf item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Item {
    /// Covers one TID.
    Single(SingleItem),

    /// Covers a contiguous TID run.
    Array(ArrayItem),

    /// A compressed batch of items.
    Compressed(CompressedItem),
}

/// Input to [`create_item`]: either raw caller values that still need
/// packing, or an already-packed slice taken out of an existing array.
pub enum Payload<'a> {
    /// Raw values; each gets packed (with short-header promotion for
    /// variable-length attributes).
    Values(&'a [Slice]),

    /// Bytes already in packed form; copied verbatim.
    Packed(&'a [u8]),
}

/// Builds a Single (`nelements == 1`) or Array (`nelements > 1`) item.
#[must_use]
pub fn create_item(
    attr: &AttrSpec,
    first_tid: Tid,
    undo: UndoPtr,
    nelements: u16,
    payload: Payload<'_>,
    isnull: bool,
) -> Item {
    debug_assert!(nelements > 0);

    let packed: Slice = if isnull {
        Slice::empty()
    } else {
        match payload {
            Payload::Packed(bytes) => bytes.into(),
            Payload::Values(values) => {
                debug_assert_eq!(usize::from(nelements), values.len());

                let mut out = vec![];
                for value in values {
                    datum::encode_into(&mut out, attr, value);
                }
                out.into()
            }
        }
    };

    let mut flags = ItemFlags::empty();
    if isnull {
        flags |= ItemFlags::NULL;
    }

    if nelements > 1 {
        flags |= ItemFlags::ARRAY;
        Item::Array(ArrayItem {
            first_tid,
            flags,
            undo,
            nelements,
            payload: packed,
        })
    } else {
        Item::Single(SingleItem {
            tid: first_tid,
            flags,
            undo,
            payload: packed,
        })
    }
}

impl ArrayItem {
    fn isnull(&self) -> bool {
        self.flags.contains(ItemFlags::NULL)
    }

    /// Byte offset of element `index` inside the packed payload.
    #[must_use]
    pub fn element_offset(&self, attr: &AttrSpec, index: usize) -> usize {
        debug_assert!(index < usize::from(self.nelements));

        if self.isnull() {
            return 0;
        }
        datum::slice_len(attr, false, &self.payload, index)
    }

    /// Cuts `count` elements starting at element `from` into a new
    /// item covering `[new_first, new_first + count)`.
    ///
    /// The slice keeps this array's undo pointer and NULL-ness.
    #[must_use]
    pub fn slice(&self, attr: &AttrSpec, from: usize, count: u16, new_first: Tid) -> Item {
        debug_assert!(from + usize::from(count) <= usize::from(self.nelements));

        if self.isnull() {
            return create_item(attr, new_first, self.undo, count, Payload::Packed(&[]), true);
        }

        let start = self.element_offset(attr, from);
        let len = datum::slice_len(
            attr,
            false,
            self.payload.get(start..).expect("slice within payload"),
            usize::from(count),
        );
        let packed = self
            .payload
            .get(start..start + len)
            .expect("slice within payload");

        create_item(attr, new_first, self.undo, count, Payload::Packed(packed), false)
    }
}

impl Item {
    /// First TID the item covers.
    #[must_use]
    pub fn first_tid(&self) -> Tid {
        match self {
            Self::Single(s) => s.tid,
            Self::Array(a) => a.first_tid,
            Self::Compressed(c) => c.first_tid,
        }
    }

    /// Last TID the item covers.
    #[must_use]
    pub fn last_tid(&self) -> Tid {
        match self {
            Self::Single(s) => s.tid,
            Self::Array(a) => Tid::new(a.first_tid.raw() + u64::from(a.nelements) - 1),
            Self::Compressed(c) => c.last_tid,
        }
    }

    /// Whether the item's TID range contains `tid`.
    #[must_use]
    pub fn covers(&self, tid: Tid) -> bool {
        self.first_tid() <= tid && tid <= self.last_tid()
    }

    /// The item's flag bits.
    #[must_use]
    pub fn flags(&self) -> ItemFlags {
        match self {
            Self::Single(s) => s.flags,
            Self::Array(a) => a.flags,
            Self::Compressed(_) => ItemFlags::COMPRESSED,
        }
    }

    /// The item's undo pointer (invalid for compressed batches; their
    /// contained items carry their own).
    #[must_use]
    pub fn undo_ptr(&self) -> UndoPtr {
        match self {
            Self::Single(s) => s.undo,
            Self::Array(a) => a.undo,
            Self::Compressed(_) => UndoPtr::INVALID,
        }
    }

    /// Full encoded size in bytes.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        match self {
            Self::Single(s) => ITEM_HEADER + s.payload.len(),
            Self::Array(a) => ARRAY_OVERHEAD + a.payload.len(),
            Self::Compressed(c) => COMPRESSED_OVERHEAD + c.payload.len(),
        }
    }
}

fn encode_header<W: Write>(
    writer: &mut W,
    tid: Tid,
    size: usize,
    flags: ItemFlags,
    undo: UndoPtr,
) -> Result<(), EncodeError> {
    debug_assert!(size <= usize::from(u16::MAX));

    tid.encode_into(writer)?;

    #[allow(clippy::cast_possible_truncation)]
    writer.write_u16::<LittleEndian>(size as u16)?;
    writer.write_u16::<LittleEndian>(flags.bits())?;
    writer.write_u64::<LittleEndian>(undo.raw())?;

    Ok(())
}

impl Encode for Item {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        let size = self.encoded_size();

        match self {
            Self::Single(s) => {
                debug_assert!(!s.flags.intersects(ItemFlags::ARRAY | ItemFlags::COMPRESSED));

                encode_header(writer, s.tid, size, s.flags, s.undo)?;
                writer.write_all(&s.payload)?;
            }
            Self::Array(a) => {
                debug_assert!(a.flags.contains(ItemFlags::ARRAY));
                debug_assert!(a.nelements >= 1);

                encode_header(writer, a.first_tid, size, a.flags, a.undo)?;
                writer.write_u16::<LittleEndian>(a.nelements)?;
                writer.write_all(&a.payload)?;
            }
            Self::Compressed(c) => {
                encode_header(writer, c.first_tid, size, ItemFlags::COMPRESSED, UndoPtr::INVALID)?;
                c.last_tid.encode_into(writer)?;
                writer.write_u32::<LittleEndian>(c.uncompressed_size)?;
                writer.write_u64::<LittleEndian>(c.checksum.into_u64())?;
                writer.write_all(&c.payload)?;
            }
        }

        Ok(())
    }
}

impl Decode for Item {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let tid = Tid::decode_from(reader)?;
        let size = usize::from(reader.read_u16::<LittleEndian>()?);
        let raw_flags = reader.read_u16::<LittleEndian>()?;
        let undo = UndoPtr::from_raw(reader.read_u64::<LittleEndian>()?);

        let flags = ItemFlags::from_bits(raw_flags)
            .ok_or(DecodeError::InvalidTag(("ItemFlags", raw_flags)))?;

        let read_payload = |reader: &mut R, len: usize| -> Result<Slice, DecodeError> {
            let mut buf = vec![0; len];
            reader.read_exact(&mut buf)?;
            Ok(buf.into())
        };

        if flags.contains(ItemFlags::COMPRESSED) {
            let payload_len = size
                .checked_sub(COMPRESSED_OVERHEAD)
                .ok_or(DecodeError::InvalidHeader("compressed item size"))?;

            let last_tid = Tid::decode_from(reader)?;
            let uncompressed_size = reader.read_u32::<LittleEndian>()?;
            let checksum = Checksum::from_raw(reader.read_u64::<LittleEndian>()?);

            Ok(Self::Compressed(CompressedItem {
                first_tid: tid,
                last_tid,
                uncompressed_size,
                checksum,
                payload: read_payload(reader, payload_len)?,
            }))
        } else if flags.contains(ItemFlags::ARRAY) {
            let payload_len = size
                .checked_sub(ARRAY_OVERHEAD)
                .ok_or(DecodeError::InvalidHeader("array item size"))?;

            let nelements = reader.read_u16::<LittleEndian>()?;
            if nelements == 0 {
                return Err(DecodeError::InvalidHeader("empty array item"));
            }

            Ok(Self::Array(ArrayItem {
                first_tid: tid,
                flags,
                undo,
                nelements,
                payload: read_payload(reader, payload_len)?,
            }))
        } else {
            let payload_len = size
                .checked_sub(ITEM_HEADER)
                .ok_or(DecodeError::InvalidHeader("single item size"))?;

            Ok(Self::Single(SingleItem {
                tid,
                flags,
                undo,
                payload: read_payload(reader, payload_len)?,
            }))
        }
    }
}
