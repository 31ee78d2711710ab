// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    buffer::BlockId,
    coding::{DecodeError, EncodeError},
    Checksum, Tid,
};

/// Represents errors that can occur in a TID tree
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Serialization failed
    Encode(EncodeError),

    /// Deserialization failed
    Decode(DecodeError),

    /// Decompression of a compressed item failed
    Decompress,

    /// Invalid checksum value (expected, got)
    ChecksumMismatch {
        /// The checksum stored in the compressed item
        expected: Checksum,
        /// The checksum of the decompressed bytes
        got: Checksum,
    },

    /// A block number did not resolve to an allocated page
    InvalidBlock(BlockId),

    /// A right-link traversal ran off the end of the tree
    FellOffEnd,

    /// A page's level did not match the descent's expectation,
    /// meaning the tree was reshaped underneath us
    LevelMismatch {
        /// Level the descent expected
        expected: u16,
        /// Level found on the page
        found: u16,
    },

    /// A page's right-link points back at the page itself
    RightLinkSelfLoop(BlockId),

    /// Could not re-find the downlink of a child block in its parent
    DownlinkNotFound(BlockId),

    /// Binary search over an internal page found no separator at or
    /// below the key
    DescentFailed(Tid),

    /// A mutation asserted that an item exists at this TID, but the
    /// leaf does not contain it
    OldItemNotFound(Tid),

    /// A write operation targeted a TID that does not exist in the
    /// tree (or is invisible to the operation's snapshot)
    ItemNotFound(Tid),

    /// A compressed item's payload contained another compressed item
    NestedCompression,

    /// The attribute descriptor in the meta directory does not match
    /// the tree handle
    AttrSpecMismatch,

    /// A single datum exceeds the configured maximum size
    DatumTooLarge(usize),

    /// An item did not fit on a fresh page while recompressing
    PageFull,

    /// The old row version changed between an update's insert-new and
    /// mark-old phases
    ConcurrentlyUpdated,

    /// Tried to lock a tuple that is already deleted
    LockDeleted(Tid),

    /// Tried to lock a tuple that was already moved by an update
    LockUpdated(Tid),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TidTreeError: {self:?}")
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// Tree result type
pub type Result<T> = std::result::Result<T, Error>;
