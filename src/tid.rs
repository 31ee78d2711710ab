// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// A logical tuple identifier.
///
/// TIDs are opaque, totally ordered 48-bit integers. They identify one
/// logical row within a single attribute's tree; the same TID in every
/// attribute tree of a table refers to the same row.
///
/// `Tid::INVALID` (zero) is the "no TID" sentinel. `Tid::MAX_PLUS_ONE`
/// is one past the largest assignable TID and is only ever used as an
/// exclusive upper bound (the high key of a rightmost page).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(u64);

/// Serialized width of a TID (48 bits).
pub(crate) const TID_WIDTH: usize = 6;

impl Tid {
    /// The "no TID" sentinel.
    pub const INVALID: Self = Self(0);

    /// The smallest assignable TID.
    pub const MIN: Self = Self(1);

    /// The largest assignable TID.
    pub const MAX: Self = Self((1 << 48) - 2);

    /// One past [`Tid::MAX`]; used as an exclusive upper bound only.
    pub const MAX_PLUS_ONE: Self = Self((1 << 48) - 1);

    /// Wraps a raw TID value.
    ///
    /// # Panics
    ///
    /// Panics if the value does not fit in 48 bits.
    #[must_use]
    pub fn new(raw: u64) -> Self {
        assert!(raw < (1 << 48), "TID does not fit in 48 bits");
        Self(raw)
    }

    /// Returns the raw 48-bit integer.
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Whether this is a real TID (not the invalid sentinel).
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.0 > 0
    }

    /// The next TID.
    #[must_use]
    pub fn next(self) -> Self {
        debug_assert!(self < Self::MAX_PLUS_ONE);
        Self(self.0 + 1)
    }

    /// The previous TID.
    #[must_use]
    pub fn prev(self) -> Self {
        debug_assert!(self.is_valid());
        Self(self.0 - 1)
    }

    /// Offset of `self` inside a run starting at `first`.
    #[must_use]
    pub(crate) fn offset_from(self, first: Self) -> u64 {
        debug_assert!(self >= first);
        self.0 - first.0
    }
}

impl std::fmt::Display for Tid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Encode for Tid {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_uint::<LittleEndian>(self.0, TID_WIDTH)?;
        Ok(())
    }
}

impl Decode for Tid {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let raw = reader.read_uint::<LittleEndian>(TID_WIDTH)?;
        Ok(Self(raw))
    }
}
