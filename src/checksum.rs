// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use xxhash_rust::xxh3::xxh3_64;

/// A 64-bit checksum over an uncompressed item batch
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Checksum(u64);

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Checksum {
    /// Wraps a checksum value.
    #[must_use]
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw 64-bit integer.
    #[must_use]
    pub fn into_u64(self) -> u64 {
        self.0
    }

    /// Computes the checksum of a byte buffer.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(xxh3_64(bytes))
    }

    pub(crate) fn check(self, expected: Self) -> crate::Result<()> {
        if self.0 == expected.0 {
            Ok(())
        } else {
            Err(crate::Error::ChecksumMismatch {
                expected,
                got: self,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Checksum;
    use test_log::test;

    #[test]
    fn checksum_detects_flip() {
        let a = Checksum::of(b"hello");
        let b = Checksum::of(b"hellp");
        assert_ne!(a, b);
        assert!(a.check(a).is_ok());
        assert!(a.check(b).is_err());
    }
}
