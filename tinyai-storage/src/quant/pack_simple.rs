//! Integer quantization with simple packing (2×u4 → u8, u8 → u8).

use super::types::Int8Overflow;
use crate::tensor::Tensor;

/// Zero point used by every integer encoding.
pub const ZERO_POINT: i32 = 0;

/// Affine scale for a tensor: `(max - min) / max_level`.
///
/// A zero range (constant or empty tensor) is replaced by 1.0 so the
/// division never degenerates.
pub fn affine_scale(tensor: &Tensor, max_level: f32) -> f32 {
    let data_range = match tensor.min_max() {
        Some((lo, hi)) => hi - lo,
        None => 0.0,
    };
    let data_range = if data_range == 0.0 || data_range.is_nan() {
        1.0
    } else {
        data_range
    };
    data_range / max_level
}

/// Unclamped integer level for a value (round half to even).
#[inline]
pub fn level(value: f32, scale: f32) -> f32 {
    (value / scale + ZERO_POINT as f32).round_ties_even()
}

/// Quantize to one byte per value.
pub fn quantize_u8(values: &[f32], scale: f32, overflow: Int8Overflow) -> Vec<u8> {
    values
        .iter()
        .map(|&v| {
            let q = level(v, scale);
            match overflow {
                // Out-of-range levels wrap like an unchecked integer cast
                Int8Overflow::Wrap => (q as i64).rem_euclid(256) as u8,
                Int8Overflow::Saturate => q.clamp(0.0, 255.0) as u8,
            }
        })
        .collect()
}

/// Quantize to 4-bit levels in `[0, 15]` and pack two per byte.
pub fn quantize_u4_packed(values: &[f32], scale: f32) -> Vec<u8> {
    let levels: Vec<u8> = values
        .iter()
        .map(|&v| level(v, scale).clamp(0.0, 15.0) as u8)
        .collect();
    pack_nibbles(&levels)
}

/// Pack 4-bit levels: first value in the high nibble, second in the low.
///
/// An odd trailing value occupies the high nibble of the final byte with a
/// zero low nibble.
pub fn pack_nibbles(levels: &[u8]) -> Vec<u8> {
    levels
        .chunks(2)
        .map(|pair| {
            let hi = pair[0] & 0x0F;
            let lo = pair.get(1).copied().unwrap_or(0) & 0x0F;
            (hi << 4) | lo
        })
        .collect()
}

/// Inverse of [`pack_nibbles`], returning exactly `count` levels.
pub fn unpack_nibbles(packed: &[u8], count: usize) -> Vec<u8> {
    packed
        .iter()
        .flat_map(|&b| [b >> 4, b & 0x0F])
        .take(count)
        .collect()
}
