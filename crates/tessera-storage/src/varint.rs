//! Variable-length integer codecs used by the pack format.
//!
//! Three encodings share the "high bit means more bytes follow" convention
//! but lay out their bits differently, so each has its own pair of
//! functions and they must never be mixed:
//!
//! - **Object header**: bits 4-6 of the first byte hold the record type and
//!   bits 0-3 the low size bits; each following byte adds 7 bits at shift
//!   `4 + 7 * (i - 1)`.
//! - **Delta size**: plain little-endian 7 bits per byte. Used for the base and
//!   result lengths at the start of a delta.
//! - **Offset-delta distance**: big-endian 7 bits per byte where every
//!   continuation adds one before shifting, so no value has two encodings.
//!
//! Decoders return `None` on truncated input or on values that do not fit in
//! 64 bits; callers turn that into an error for their own context.

const CONTINUE: u8 = 0x80;
const LOW7: u8 = 0x7f;

/// Decodes a pack record header. Returns `(type_code, size, bytes_consumed)`.
pub fn read_object_header(buf: &[u8]) -> Option<(u8, u64, usize)> {
    let first = *buf.first()?;
    let type_code = (first >> 4) & 0x07;
    let mut size = u64::from(first & 0x0f);
    let mut shift = 4u32;
    let mut pos = 1;
    let mut byte = first;

    while byte & CONTINUE != 0 {
        byte = *buf.get(pos)?;
        pos += 1;
        if shift > 63 {
            return None;
        }
        let chunk = u64::from(byte & LOW7);
        if shift > 57 && chunk >> (64 - shift) != 0 {
            return None;
        }
        size |= chunk << shift;
        shift += 7;
    }

    Some((type_code, size, pos))
}

/// Encodes a pack record header.
pub fn write_object_header(out: &mut Vec<u8>, type_code: u8, size: u64) {
    let mut first = ((type_code & 0x07) << 4) | (size & 0x0f) as u8;
    let mut remaining = size >> 4;
    if remaining > 0 {
        first |= CONTINUE;
    }
    out.push(first);

    while remaining > 0 {
        let mut byte = (remaining & u64::from(LOW7)) as u8;
        remaining >>= 7;
        if remaining > 0 {
            byte |= CONTINUE;
        }
        out.push(byte);
    }
}

/// Decodes a delta base/result length. Returns `(value, bytes_consumed)`.
pub fn read_size(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    let mut pos = 0;

    loop {
        let byte = *buf.get(pos)?;
        pos += 1;
        if shift > 63 {
            return None;
        }
        let chunk = u64::from(byte & LOW7);
        if shift > 57 && chunk >> (64 - shift) != 0 {
            return None;
        }
        value |= chunk << shift;
        if byte & CONTINUE == 0 {
            return Some((value, pos));
        }
        shift += 7;
    }
}

/// Encodes a delta base/result length.
pub fn write_size(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & u64::from(LOW7)) as u8;
        value >>= 7;
        if value != 0 {
            byte |= CONTINUE;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decodes the backward distance of an offset-delta record.
/// Returns `(distance, bytes_consumed)`.
pub fn read_ofs_distance(buf: &[u8]) -> Option<(u64, usize)> {
    let mut byte = *buf.first()?;
    let mut value = u64::from(byte & LOW7);
    let mut pos = 1;

    while byte & CONTINUE != 0 {
        byte = *buf.get(pos)?;
        pos += 1;
        value = value
            .checked_add(1)?
            .checked_mul(128)?
            .checked_add(u64::from(byte & LOW7))?;
    }

    Some((value, pos))
}

/// Encodes the backward distance of an offset-delta record.
pub fn write_ofs_distance(out: &mut Vec<u8>, distance: u64) {
    let mut buf = [0u8; 10];
    let mut pos = buf.len() - 1;
    let mut value = distance;

    buf[pos] = (value & u64::from(LOW7)) as u8;
    value >>= 7;
    while value > 0 {
        value -= 1;
        pos -= 1;
        buf[pos] = CONTINUE | (value & u64::from(LOW7)) as u8;
        value >>= 7;
    }
    out.extend_from_slice(&buf[pos..]);
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: object header round-trips type and size.
        #[test]
        fn prop_object_header_roundtrip(type_code in 0u8..8, size in any::<u64>()) {
            let mut out = Vec::new();
            write_object_header(&mut out, type_code, size);
            prop_assert_eq!(read_object_header(&out), Some((type_code, size, out.len())));
        }

        /// Property: delta sizes round-trip.
        #[test]
        fn prop_delta_size_roundtrip(value in any::<u64>()) {
            let mut out = Vec::new();
            write_size(&mut out, value);
            prop_assert_eq!(read_size(&out), Some((value, out.len())));
        }

        /// Property: offset-delta distances round-trip.
        #[test]
        fn prop_ofs_distance_roundtrip(value in 0u64..(1u64 << 62)) {
            let mut out = Vec::new();
            write_ofs_distance(&mut out, value);
            prop_assert_eq!(read_ofs_distance(&out), Some((value, out.len())));
        }

        /// Property: decoders never panic on arbitrary input.
        #[test]
        fn prop_decoders_no_panic(data in prop::collection::vec(any::<u8>(), 0..16)) {
            let _ = read_object_header(&data);
            let _ = read_size(&data);
            let _ = read_ofs_distance(&data);
        }
    }
}
