//! Weight quantization.
//!
//! Maps f32 tensors to one of four encodings:
//! - 32 bits: f32 passthrough
//! - 16 bits: IEEE half precision
//! - 8 bits: affine `u8` levels, `scale = range / 255`
//! - 4 bits: affine levels clamped to `[0, 15]`, packed two per byte
//!
//! The zero point is fixed at 0, so the integer encodings are scale-only.
//! Unless the tensor minimum is exactly 0, some levels fall outside the
//! integer range: they clamp at 4 bits and wrap (or saturate, see
//! [`Int8Overflow`]) at 8 bits.

mod float_quant;
mod pack_simple;
mod types;


use crate::tensor::{BitWidth, ExtractedTensor, Tensor, TensorRole};

pub use pack_simple::{pack_nibbles, unpack_nibbles, ZERO_POINT};
pub use types::{Int8Overflow, QuantizedTensor, RawTensor, StoredTensor};

/// Quantize a tensor at the given bit width.
pub fn quantize(tensor: &Tensor, bits: BitWidth, overflow: Int8Overflow) -> QuantizedTensor {
    let values = tensor.values();
    let (scale, payload) = match bits {
        BitWidth::B32 => (1.0, float_quant::encode_f32(values)),
        BitWidth::B16 => (1.0, float_quant::encode_f16(values)),
        BitWidth::B8 => {
            let scale = pack_simple::affine_scale(tensor, 255.0);
            (scale, pack_simple::quantize_u8(values, scale, overflow))
        }
        BitWidth::B4 => {
            let scale = pack_simple::affine_scale(tensor, 15.0);
            (scale, pack_simple::quantize_u4_packed(values, scale))
        }
    };

    QuantizedTensor {
        shape: tensor.shape().to_vec(),
        bits,
        scale,
        zero_point: ZERO_POINT,
        payload,
    }
}

/// Bit width for a role, or None when the role bypasses quantization.
///
/// Biases are floored at 8 bits in mixed-precision mode.
pub fn select_bits(role: TensorRole, configured: BitWidth, mixed_precision: bool) -> Option<BitWidth> {
    if !role.is_quantized() {
        return None;
    }
    if role == TensorRole::Bias && mixed_precision {
        Some(BitWidth::B8)
    } else {
        Some(configured)
    }
}

/// Encode an extracted tensor for the weight store according to its role.
pub fn encode_for_role(
    extracted: &ExtractedTensor,
    configured: BitWidth,
    mixed_precision: bool,
    overflow: Int8Overflow,
) -> StoredTensor {
    let tensor = &extracted.tensor;
    match select_bits(extracted.role_kind(), configured, mixed_precision) {
        Some(bits) => quantize(tensor, bits, overflow).into(),
        None => RawTensor::from_f32(tensor.shape().to_vec(), tensor.values()).into(),
    }
}

/// Reconstruct f32 values from a quantized tensor: `(q - zero_point) * scale`.
pub fn dequantize(q: &QuantizedTensor) -> Vec<f32> {
    let zp = q.zero_point as f32;
    match q.bits {
        BitWidth::B32 => float_quant::decode_f32(&q.payload),
        BitWidth::B16 => float_quant::decode_f16(&q.payload),
        BitWidth::B8 => q
            .payload
            .iter()
            .map(|&b| (b as f32 - zp) * q.scale)
            .collect(),
        BitWidth::B4 => unpack_nibbles(&q.payload, q.element_count())
            .into_iter()
            .map(|l| (l as f32 - zp) * q.scale)
            .collect(),
    }
}

/// Reconstruct f32 values from any store entry.
pub fn decode_stored(entry: &StoredTensor) -> Vec<f32> {
    match entry {
        StoredTensor::Quantized(q) => dequantize(q),
        StoredTensor::Raw(r) => r.to_f32(),
    }
}
