// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

// Object Identifier codec: pure functions packing small values
// into a 64-bit tagged id: top 8 bits select the type, low 56 bits carry the
// payload.
//
// No direct analogue exists in the source (`dotdb-core` has no comparable value
// layer); grounded on the byte-packing discipline of
// `file_format::PageHeader::serialize`/`deserialize` (fixed-width,
// big-endian, manual bit arithmetic over a byte buffer) applied to a u64
// instead of a byte slice.

use crate::error::{StorageError, StorageResult};

pub const TYPE_MASK: u64 = 0xFF << 56;
pub const PAYLOAD_MASK: u64 = !TYPE_MASK;

pub const MASK_POSITIVE_INT: u64 = 0x01 << 56;
pub const MASK_NEGATIVE_INT: u64 = 0x02 << 56;
pub const MASK_FLOAT: u64 = 0x03 << 56;
pub const MASK_INLINE_STRING: u64 = 0x04 << 56;
pub const MASK_INLINE_STRING5: u64 = 0x05 << 56;
pub const MASK_INLINE_IRI: u64 = 0x06 << 56;
pub const MASK_EXTERN_STRING: u64 = 0x07 << 56;
pub const MASK_EXTERN_IRI: u64 = 0x08 << 56;

/// Sentinel returned by the extendible hash when a key is absent.
pub const MASK_NOT_FOUND: u64 = u64::MAX;

pub const MAX_INLINED_BYTES: usize = 7;
const MAX_INLINE_INT_MAGNITUDE: u64 = (1u64 << 56) - 1;

fn type_of(val: u64) -> u64 {
    val & TYPE_MASK
}

fn payload_of(val: u64) -> u64 {
    val & PAYLOAD_MASK
}

/// Packs up to `width` bytes high-byte-first into the low `width` bytes of
/// the 56-bit payload. Bytes beyond `bytes.len()` are left zero, which is
/// also the decode-side terminator for variable-length inlined strings.
fn pack_be(bytes: &[u8], width: usize) -> StorageResult<u64> {
    if bytes.len() > width {
        return Err(StorageError::NotInlinable);
    }
    let mut payload: u64 = 0;
    for (i, &b) in bytes.iter().enumerate() {
        let shift = 8 * (width - 1 - i);
        payload |= (b as u64) << shift;
    }
    Ok(payload)
}

/// Inverse of [`decode`] restricted to `N` bytes, used internally by the
/// string/IRI decoders before trimming at the first zero byte.
pub fn decode<const N: usize>(val: u64) -> [u8; N] {
    debug_assert!(N >= 1 && N <= MAX_INLINED_BYTES);
    let mut out = [0u8; N];
    for (i, slot) in out.iter_mut().enumerate() {
        let shift = 8 * (N - 1 - i);
        *slot = ((val >> shift) & 0xFF) as u8;
    }
    out
}

/// Packs `i` into the low 56 bits if `|i| < 2^56`; negatives are stored as
/// the one's complement of their magnitude so the unsigned payload preserves
/// lexicographic order.
pub fn inline_int(i: i64) -> StorageResult<u64> {
    let magnitude = i.unsigned_abs();
    if magnitude > MAX_INLINE_INT_MAGNITUDE {
        return Err(StorageError::NotInlinable);
    }
    if i >= 0 {
        Ok(MASK_POSITIVE_INT | magnitude)
    } else {
        let complement = (!magnitude) & MAX_INLINE_INT_MAGNITUDE;
        Ok(MASK_NEGATIVE_INT | complement)
    }
}

pub fn decode_int(val: u64) -> i64 {
    let payload = payload_of(val);
    if type_of(val) == MASK_NEGATIVE_INT {
        let magnitude = (!payload) & MAX_INLINE_INT_MAGNITUDE;
        -(magnitude as i64)
    } else {
        payload as i64
    }
}

pub fn inline_string(bytes: &[u8]) -> StorageResult<u64> {
    Ok(MASK_INLINE_STRING | pack_be(bytes, 7)?)
}

pub fn decode_string(val: u64) -> Vec<u8> {
    trim_terminator(decode::<7>(val))
}

pub fn inline_string5(bytes: &[u8]) -> StorageResult<u64> {
    Ok(MASK_INLINE_STRING5 | pack_be(bytes, 5)?)
}

pub fn decode_string5(val: u64) -> Vec<u8> {
    trim_terminator(decode::<5>(val))
}

pub fn inline_iri(bytes: &[u8]) -> StorageResult<u64> {
    Ok(MASK_INLINE_IRI | pack_be(bytes, 5)?)
}

pub fn decode_iri(val: u64) -> Vec<u8> {
    trim_terminator(decode::<5>(val))
}

fn trim_terminator<const N: usize>(bytes: [u8; N]) -> Vec<u8> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(N);
    bytes[..end].to_vec()
}

/// Reinterprets `f` as its IEEE-754 bit pattern in the low 32 bits.
pub fn inline_float(f: f32) -> u64 {
    MASK_FLOAT | (f.to_bits() as u64)
}

pub fn decode_float(val: u64) -> f32 {
    f32::from_bits(payload_of(val) as u32)
}

/// Tags a string manager id too large to inline with [`MASK_EXTERN_STRING`].
/// `id` must come from [`crate::strings::StringManager::append`], whose
/// 44-bit encoding always fits the 56-bit payload.
pub fn extern_string(id: u64) -> StorageResult<u64> {
    if id > MAX_INLINE_INT_MAGNITUDE {
        return Err(StorageError::NotInlinable);
    }
    Ok(MASK_EXTERN_STRING | id)
}

pub fn decode_extern_string(val: u64) -> u64 {
    payload_of(val)
}

pub fn extern_iri(id: u64) -> StorageResult<u64> {
    if id > MAX_INLINE_INT_MAGNITUDE {
        return Err(StorageError::NotInlinable);
    }
    Ok(MASK_EXTERN_IRI | id)
}

pub fn decode_extern_iri(val: u64) -> u64 {
    payload_of(val)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_int_roundtrips_negative_one() {
        let encoded = inline_int(-1).unwrap();
        assert_eq!(decode_int(encoded), -1);
    }

    #[test]
    fn inline_int_roundtrips_max_magnitude() {
        let max = (1i64 << 56) - 1;
        let encoded = inline_int(max).unwrap();
        assert_eq!(decode_int(encoded), max);
    }

    #[test]
    fn inline_int_rejects_overflow() {
        assert!(matches!(inline_int(1i64 << 56), Err(StorageError::NotInlinable)));
    }

    #[test]
    fn inline_int_roundtrips_zero_and_small_values() {
        for v in [0i64, 1, -1, 42, -42, 1_000_000, -1_000_000] {
            let encoded = inline_int(v).unwrap();
            assert_eq!(decode_int(encoded), v);
        }
    }

    #[test]
    fn inline_string_roundtrips_short_ascii() {
        let s = b"hi";
        let encoded = inline_string(s).unwrap();
        assert_eq!(decode_string(encoded), s);
    }

    #[test]
    fn inline_string_roundtrips_full_width() {
        let s = b"abcdefg";
        let encoded = inline_string(s).unwrap();
        assert_eq!(decode_string(encoded), s);
    }

    #[test]
    fn inline_string_rejects_too_long() {
        assert!(inline_string(b"12345678").is_err());
    }

    #[test]
    fn inline_string5_and_iri_roundtrip() {
        let s = b"abcde";
        assert_eq!(decode_string5(inline_string5(s).unwrap()), s);
        assert_eq!(decode_iri(inline_iri(s).unwrap()), s);
    }

    #[test]
    fn inline_float_roundtrips() {
        for f in [0.0f32, 1.5, -3.25, f32::MIN_POSITIVE] {
            assert_eq!(decode_float(inline_float(f)), f);
        }
    }

    #[test]
    fn masks_do_not_overlap_payload() {
        assert_eq!(MASK_POSITIVE_INT & PAYLOAD_MASK, 0);
        assert_eq!(MASK_NEGATIVE_INT & PAYLOAD_MASK, 0);
        assert_eq!(MASK_FLOAT & PAYLOAD_MASK, 0);
    }

    #[test]
    fn extern_string_roundtrips_a_string_manager_id() {
        use crate::file_manager::FileManager;
        use crate::strings::StringManager;
        use crate::upool::UPool;
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let fm = Arc::new(FileManager::new(dir.path()).unwrap());
        let upool = UPool::new(fm.clone(), 4).unwrap();
        let blob_file = fm.get_file_id("blobs.dat").unwrap();
        let strings = StringManager::new(upool, blob_file);

        let string_id = strings.append(b"a very long value that will not fit inline").unwrap();
        let encoded = extern_string(string_id.0).unwrap();
        assert_eq!(type_of(encoded), MASK_EXTERN_STRING);
        assert_eq!(decode_extern_string(encoded), string_id.0);
    }

    #[test]
    fn extern_iri_roundtrips() {
        let encoded = extern_iri(12345).unwrap();
        assert_eq!(decode_extern_iri(encoded), 12345);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn inline_int_roundtrips_any_representable_value(i in -(1i64 << 56) + 1..(1i64 << 56)) {
            let encoded = inline_int(i).unwrap();
            prop_assert_eq!(decode_int(encoded), i);
        }

        #[test]
        fn inline_string_roundtrips_any_short_ascii(s in "[a-zA-Z0-9]{0,7}") {
            let encoded = inline_string(s.as_bytes()).unwrap();
            prop_assert_eq!(decode_string(encoded), s.as_bytes());
        }

        #[test]
        fn inline_float_roundtrips_any_finite_value(f in proptest::num::f32::NORMAL) {
            let encoded = inline_float(f);
            prop_assert_eq!(decode_float(encoded), f);
        }
    }
}
