// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Attribute (column) number, 1-based as in the host engine's catalog.
pub type AttrNo = u16;

/// Physical width class of an attribute.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AttrLen {
    /// Fixed-width datum of exactly this many bytes.
    Fixed(u16),

    /// Variable-length datum, stored with a 1-byte short or 4-byte
    /// long length header.
    Variable,
}

/// Descriptor of one attribute: its width class and whether the host
/// engine passes it by value.
///
/// The by-value flag does not change the on-page representation; it is
/// carried so sibling column trees of one table can be checked for
/// catalog drift against the meta directory.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AttrSpec {
    /// Width class.
    pub len: AttrLen,

    /// Whether the datum is carried in a machine word by the host.
    pub byval: bool,
}

impl AttrSpec {
    /// Creates an attribute descriptor.
    #[must_use]
    pub fn new(len: AttrLen, byval: bool) -> Self {
        Self { len, byval }
    }

    /// Whether this attribute is variable-length.
    #[must_use]
    pub fn is_varlen(&self) -> bool {
        matches!(self.len, AttrLen::Variable)
    }
}
