//! Fixed-width bit packing for small integer runs.
//!
//! A run of `n` values is stored as one bit-width byte followed by
//! `ceil(n * width / 8)` bytes, values laid out least-significant bit first.
//! The count itself is not stored: chunk payloads already record it.

use crate::error::{BarrelError, Result};

/// Compute the number of bits needed to represent the maximum value.
#[inline]
pub fn bits_needed(max_val: u32) -> u8 {
    if max_val == 0 {
        0
    } else {
        32 - max_val.leading_zeros() as u8
    }
}

/// Number of payload bytes occupied by `n` values of `bit_width` bits.
#[inline]
pub fn packed_len(n: usize, bit_width: u8) -> usize {
    (n * bit_width as usize).div_ceil(8)
}

/// Append `values` to `output` as a bit-width byte plus packed payload.
pub fn pack(values: &[u32], output: &mut Vec<u8>) {
    let bit_width = bits_needed(values.iter().copied().max().unwrap_or(0));
    output.push(bit_width);
    if bit_width == 0 {
        return;
    }

    let start = output.len();
    output.resize(start + packed_len(values.len(), bit_width), 0);

    let mut bit_pos = 0usize;
    for &value in values {
        let mut remaining_bits = bit_width as usize;
        let mut val = value;
        let mut byte_idx = start + bit_pos / 8;
        let mut bit_offset = bit_pos % 8;

        while remaining_bits > 0 {
            let bits_in_byte = (8 - bit_offset).min(remaining_bits);
            let mask = ((1u32 << bits_in_byte) - 1) as u8;
            output[byte_idx] |= ((val as u8) & mask) << bit_offset;
            val >>= bits_in_byte;
            remaining_bits -= bits_in_byte;
            byte_idx += 1;
            bit_offset = 0;
        }

        bit_pos += bit_width as usize;
    }
}

/// Unpack `output.len()` values from `input`, returning the bytes consumed.
pub fn unpack(input: &[u8], output: &mut [u32]) -> Result<usize> {
    let bit_width = *input
        .first()
        .ok_or_else(|| BarrelError::corruption("missing bit width"))?;
    if bit_width > 32 {
        return Err(BarrelError::corruption(format!(
            "bit width {bit_width} exceeds 32"
        )));
    }
    if bit_width == 0 {
        output.fill(0);
        return Ok(1);
    }

    let payload_len = packed_len(output.len(), bit_width);
    let payload = input
        .get(1..1 + payload_len)
        .ok_or_else(|| BarrelError::corruption("truncated bit-packed run"))?;

    let mut bit_pos = 0usize;
    for out in output.iter_mut() {
        let mut value = 0u32;
        let mut remaining_bits = bit_width as usize;
        let mut byte_idx = bit_pos / 8;
        let mut bit_offset = bit_pos % 8;
        let mut shift = 0;

        while remaining_bits > 0 {
            let bits_in_byte = (8 - bit_offset).min(remaining_bits);
            let mask = ((1u32 << bits_in_byte) - 1) as u8;
            let byte_val = (payload[byte_idx] >> bit_offset) & mask;
            value |= (byte_val as u32) << shift;
            shift += bits_in_byte;
            remaining_bits -= bits_in_byte;
            byte_idx += 1;
            bit_offset = 0;
        }

        *out = value;
        bit_pos += bit_width as usize;
    }

    Ok(1 + payload_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_needed() {
        assert_eq!(bits_needed(0), 0);
        assert_eq!(bits_needed(1), 1);
        assert_eq!(bits_needed(255), 8);
        assert_eq!(bits_needed(256), 9);
        assert_eq!(bits_needed(u32::MAX), 32);
    }

    #[test]
    fn test_pack_unpack_mixed_widths() {
        let values = vec![3, 0, 17, 1023, 5, 999, 1];
        let mut packed = Vec::new();
        pack(&values, &mut packed);
        assert_eq!(packed[0], 10);
        assert_eq!(packed.len(), 1 + packed_len(values.len(), 10));

        let mut decoded = vec![0u32; values.len()];
        let used = unpack(&packed, &mut decoded).unwrap();
        assert_eq!(used, packed.len());
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_all_zero_run_is_one_byte() {
        let mut packed = Vec::new();
        pack(&[0, 0, 0], &mut packed);
        assert_eq!(packed, vec![0]);

        let mut decoded = [9u32; 3];
        assert_eq!(unpack(&packed, &mut decoded).unwrap(), 1);
        assert_eq!(decoded, [0, 0, 0]);
    }

    #[test]
    fn test_full_width_values() {
        let values = [u32::MAX, 0, u32::MAX - 1];
        let mut packed = Vec::new();
        pack(&values, &mut packed);

        let mut decoded = [0u32; 3];
        unpack(&packed, &mut decoded).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_truncated_input() {
        let mut packed = Vec::new();
        pack(&[100, 200, 300], &mut packed);
        packed.pop();

        let mut decoded = [0u32; 3];
        assert!(unpack(&packed, &mut decoded).unwrap_err().is_corruption());
        assert!(unpack(&[], &mut decoded).is_err());
    }
}
