// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Packed datum encoding.
//!
//! Fixed-width attributes are stored raw. Variable-length attributes
//! carry a length header: a 1-byte "short" header when the whole datum
//! (header included) fits in 127 bytes, else a 4-byte "long" header.
//! Both header forms store `total_size << 1`; bit 0 distinguishes them
//! (1 = short). The encoder always uses the short form when it fits,
//! so a long header whose payload would fit a short one never appears
//! in a page or an array payload.

use crate::{AttrLen, AttrSpec};
use byteorder::{ByteOrder, LittleEndian};

/// Largest total size (header included) representable by a short header.
const SHORT_MAX: usize = 0x7F;

/// Bytes a short header occupies.
const SHORT_HEADER: usize = 1;

/// Bytes a long header occupies.
const LONG_HEADER: usize = 4;

/// Size the given value occupies once packed, header included.
#[must_use]
pub fn encoded_size(attr: &AttrSpec, value: &[u8]) -> usize {
    match attr.len {
        AttrLen::Fixed(n) => {
            debug_assert_eq!(usize::from(n), value.len(), "fixed-width datum size mismatch");
            usize::from(n)
        }
        AttrLen::Variable => {
            if value.len() + SHORT_HEADER <= SHORT_MAX {
                value.len() + SHORT_HEADER
            } else {
                value.len() + LONG_HEADER
            }
        }
    }
}

/// Appends the packed form of `value` to `out`.
pub fn encode_into(out: &mut Vec<u8>, attr: &AttrSpec, value: &[u8]) {
    match attr.len {
        AttrLen::Fixed(n) => {
            debug_assert_eq!(usize::from(n), value.len(), "fixed-width datum size mismatch");
            out.extend_from_slice(value);
        }
        AttrLen::Variable => {
            let total = value.len() + SHORT_HEADER;
            if total <= SHORT_MAX {
                #[allow(clippy::cast_possible_truncation)]
                out.push(((total as u8) << 1) | 1);
            } else {
                let total = value.len() + LONG_HEADER;
                let mut header = [0u8; LONG_HEADER];
                #[allow(clippy::cast_possible_truncation)]
                LittleEndian::write_u32(&mut header, (total as u32) << 1);
                out.extend_from_slice(&header);
            }
            out.extend_from_slice(value);
        }
    }
}

/// Total packed size (header included) of the datum starting at `bytes`.
///
/// The packed stream is produced by [`encode_into`], so a long header
/// that could have been short indicates corruption.
#[must_use]
pub fn stored_size(attr: &AttrSpec, bytes: &[u8]) -> usize {
    match attr.len {
        AttrLen::Fixed(n) => usize::from(n),
        AttrLen::Variable => {
            let first = *bytes.first().expect("datum header within payload");
            if first & 1 == 1 {
                usize::from(first >> 1)
            } else {
                let total = (LittleEndian::read_u32(bytes) >> 1) as usize;
                debug_assert!(
                    total - LONG_HEADER + SHORT_HEADER > SHORT_MAX,
                    "shortenable long-header varlena in packed stream",
                );
                total
            }
        }
    }
}

/// Byte range of the raw value inside the packed datum at `bytes`.
#[must_use]
pub fn value_range(attr: &AttrSpec, bytes: &[u8]) -> std::ops::Range<usize> {
    match attr.len {
        AttrLen::Fixed(n) => 0..usize::from(n),
        AttrLen::Variable => {
            let total = stored_size(attr, bytes);
            let first = *bytes.first().expect("datum header within payload");
            if first & 1 == 1 {
                SHORT_HEADER..total
            } else {
                LONG_HEADER..total
            }
        }
    }
}

/// Byte length of a packed run of `nelements` datums starting at
/// `payload`.
///
/// For fixed-width attributes this is a multiplication; for
/// variable-length ones the headers are walked one by one.
#[must_use]
pub fn slice_len(attr: &AttrSpec, isnull: bool, payload: &[u8], nelements: usize) -> usize {
    if isnull {
        return 0;
    }

    match attr.len {
        AttrLen::Fixed(n) => usize::from(n) * nelements,
        AttrLen::Variable => {
            let mut pos = 0;

            for _ in 0..nelements {
                pos += stored_size(attr, payload.get(pos..).expect("slice within payload"));
            }

            pos
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AttrLen, AttrSpec};
    use test_log::test;

    fn varlen() -> AttrSpec {
        AttrSpec::new(AttrLen::Variable, false)
    }

    #[test]
    fn fixed_roundtrip() {
        let attr = AttrSpec::new(AttrLen::Fixed(4), true);
        let mut buf = vec![];
        encode_into(&mut buf, &attr, &[1, 2, 3, 4]);
        assert_eq!(4, buf.len());
        assert_eq!(4, stored_size(&attr, &buf));
        assert_eq!(&[1, 2, 3, 4], &buf[value_range(&attr, &buf)]);
    }

    #[test]
    fn short_header_is_used_when_it_fits() {
        let mut buf = vec![];
        encode_into(&mut buf, &varlen(), &[7u8; 126]);
        assert_eq!(127, buf.len());
        assert_eq!(127, stored_size(&varlen(), &buf));
        assert_eq!(1..127, value_range(&varlen(), &buf));
    }

    #[test]
    fn long_header_above_short_max() {
        let mut buf = vec![];
        encode_into(&mut buf, &varlen(), &[7u8; 127]);
        assert_eq!(131, buf.len());
        assert_eq!(131, stored_size(&varlen(), &buf));
        assert_eq!(4..131, value_range(&varlen(), &buf));
    }

    #[test]
    fn slice_len_walks_headers() {
        let mut buf = vec![];
        encode_into(&mut buf, &varlen(), b"abc");
        encode_into(&mut buf, &varlen(), &[9u8; 200]);
        encode_into(&mut buf, &varlen(), b"");
        assert_eq!(4, slice_len(&varlen(), false, &buf, 1));
        assert_eq!(4 + 204, slice_len(&varlen(), false, &buf, 2));
        assert_eq!(4 + 204 + 1, slice_len(&varlen(), false, &buf, 3));
        assert_eq!(0, slice_len(&varlen(), true, &buf, 3));
    }
}
