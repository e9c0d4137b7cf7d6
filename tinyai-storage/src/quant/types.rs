//! Quantized tensor types.

use serde::{Deserialize, Serialize};

use crate::tensor::{element_count, BitWidth};

/// What to do with 8-bit levels that fall outside `[0, 255]`.
///
/// With the fixed zero point of 0, negative inputs produce negative levels and
/// a positive minimum pushes the maximum above 255. The reference encoding
/// casts without clamping, which wraps modulo 256; `Saturate` clamps instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Int8Overflow {
    #[default]
    Wrap,
    Saturate,
}

/// A weight or bias tensor after quantization.
///
/// `scale` and `zero_point` are always present. For 16- and 32-bit widths they
/// are the marker values `1.0` and `0`. `zero_point` is always 0 in practice:
/// the encoding is scale-only even though the field is serialized.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedTensor {
    pub shape: Vec<usize>,
    pub bits: BitWidth,
    pub scale: f32,
    pub zero_point: i32,
    pub payload: Vec<u8>,
}

impl QuantizedTensor {
    pub fn element_count(&self) -> usize {
        element_count(&self.shape)
    }

    /// Check the payload length invariant for the bit width.
    pub fn payload_is_consistent(&self) -> bool {
        self.payload.len() == self.bits.payload_len(self.element_count())
    }
}

/// A tensor stored verbatim as little-endian f32 bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTensor {
    pub shape: Vec<usize>,
    pub payload: Vec<u8>,
}

impl RawTensor {
    pub fn from_f32(shape: Vec<usize>, values: &[f32]) -> Self {
        Self {
            shape,
            payload: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    pub fn to_f32(&self) -> Vec<f32> {
        self.payload
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}

/// An entry of the weight store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredTensor {
    Quantized(QuantizedTensor),
    Raw(RawTensor),
}

impl StoredTensor {
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Quantized(q) => &q.shape,
            Self::Raw(r) => &r.shape,
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Quantized(q) => &q.payload,
            Self::Raw(r) => &r.payload,
        }
    }

    pub fn bits(&self) -> Option<BitWidth> {
        match self {
            Self::Quantized(q) => Some(q.bits),
            Self::Raw(_) => None,
        }
    }

    pub fn as_quantized(&self) -> Option<&QuantizedTensor> {
        match self {
            Self::Quantized(q) => Some(q),
            Self::Raw(_) => None,
        }
    }

    pub fn element_count(&self) -> usize {
        element_count(self.shape())
    }
}

impl From<QuantizedTensor> for StoredTensor {
    fn from(value: QuantizedTensor) -> Self {
        Self::Quantized(value)
    }
}

impl From<RawTensor> for StoredTensor {
    fn from(value: RawTensor) -> Self {
        Self::Raw(value)
    }
}
