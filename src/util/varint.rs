//! Variable-length integers.
//!
//! 7 bits per byte with a continuation bit, little-endian groups. These are
//! the `vu32`/`vu64` fields of every on-disk structure in this crate and the
//! whole of the `VByte` posting codec.

use crate::error::{BarrelError, Result};

/// Maximum encoded length of a u32.
pub const MAX_VU32_LEN: usize = 5;

/// Maximum encoded length of a u64.
pub const MAX_VU64_LEN: usize = 10;

#[inline]
pub fn put_u32(out: &mut Vec<u8>, value: u32) {
    put_u64(out, value as u64);
}

#[inline]
pub fn put_u64(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push(value as u8 | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Encode a u64 into a fresh buffer.
pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(encoded_len(value));
    put_u64(&mut bytes, value);
    bytes
}

/// Number of bytes `value` occupies once encoded.
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Decode a u32 at the start of `bytes`. Returns the value and the number
/// of bytes consumed.
pub fn decode_u32(bytes: &[u8]) -> Result<(u32, usize)> {
    let (value, read) = decode_u64(bytes)?;
    let value = u32::try_from(value)
        .map_err(|_| BarrelError::corruption(format!("varint {value} overflows u32")))?;
    Ok((value, read))
}

/// Decode a u64 at the start of `bytes`. Returns the value and the number
/// of bytes consumed.
pub fn decode_u64(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut value = 0u64;
    for (i, &byte) in bytes.iter().take(MAX_VU64_LEN).enumerate() {
        let group = (byte & 0x7F) as u64;
        // The tenth byte holds the top bit of a u64 only.
        if i == MAX_VU64_LEN - 1 && group > 1 {
            return Err(BarrelError::corruption("varint overflows u64"));
        }
        value |= group << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    if bytes.len() >= MAX_VU64_LEN {
        Err(BarrelError::corruption("varint longer than 10 bytes"))
    } else {
        Err(BarrelError::corruption("truncated varint"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundaries() {
        for value in [0, 1, 127, 128, 16383, 16384, u32::MAX as u64, 1 << 40, u64::MAX] {
            let encoded = encode_u64(value);
            assert_eq!(encoded.len(), encoded_len(value));
            assert_eq!(decode_u64(&encoded).unwrap(), (value, encoded.len()));
        }
        assert_eq!(encoded_len(u32::MAX as u64), MAX_VU32_LEN);
        assert_eq!(encoded_len(u64::MAX), MAX_VU64_LEN);
    }

    #[test]
    fn test_decode_stops_at_first_value() {
        let mut bytes = Vec::new();
        put_u32(&mut bytes, 300);
        put_u32(&mut bytes, 5);
        assert_eq!(bytes, vec![0xAC, 0x02, 0x05]);

        let (first, read) = decode_u32(&bytes).unwrap();
        assert_eq!((first, read), (300, 2));
        assert_eq!(decode_u32(&bytes[read..]).unwrap(), (5, 1));
    }

    #[test]
    fn test_damaged_input() {
        assert!(decode_u32(&[0x80]).unwrap_err().is_corruption());
        assert!(decode_u32(&[]).unwrap_err().is_corruption());
        assert!(decode_u64(&[0xFF; 11]).unwrap_err().is_corruption());
        assert!(decode_u32(&encode_u64(u32::MAX as u64 + 1)).unwrap_err().is_corruption());

        let mut too_big = vec![0xFF; 9];
        too_big.push(0x02);
        assert!(decode_u64(&too_big).unwrap_err().is_corruption());
    }
}
