//! Dense tensors, weight roles and quantization bit widths.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};

/// Dense f32 tensor extracted from a source model.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    name: String,
    shape: Vec<usize>,
    values: Vec<f32>,
}

impl Tensor {
    /// Create a tensor, checking that `values` matches `shape`.
    ///
    /// An empty shape denotes a scalar (one element).
    pub fn new(name: impl Into<String>, shape: Vec<usize>, values: Vec<f32>) -> Result<Self> {
        let name = name.into();
        let expected = element_count(&shape);
        if expected != values.len() {
            return Err(StorageError::ShapeMismatch {
                name,
                expected,
                actual: values.len(),
            });
        }
        Ok(Self {
            name,
            shape,
            values,
        })
    }

    /// Convenience constructor for 1-D tensors.
    pub fn from_values(name: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            shape: vec![values.len()],
            values,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Replace the values, keeping name and shape.
    ///
    /// Used by element-wise transforms (pruning, clustering) that never
    /// change the element count.
    pub fn with_values(self, values: Vec<f32>) -> Self {
        debug_assert_eq!(values.len(), self.values.len());
        Self {
            name: self.name,
            shape: self.shape,
            values,
        }
    }

    /// Minimum and maximum value, or None for an empty tensor.
    pub fn min_max(&self) -> Option<(f32, f32)> {
        let mut iter = self.values.iter().copied();
        let first = iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
    }
}

/// Number of elements described by a shape (empty shape = scalar).
pub fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// [`element_count`] for untrusted shapes; None on overflow.
pub fn checked_element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

/// A tensor together with its structural position in the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedTensor {
    /// Owning layer, node or module.
    pub owner: String,
    /// Role within the owner, e.g. "weight", "bias", "running_mean".
    pub role: String,
    pub tensor: Tensor,
}

impl ExtractedTensor {
    pub fn new(owner: impl Into<String>, role: impl Into<String>, tensor: Tensor) -> Self {
        Self {
            owner: owner.into(),
            role: role.into(),
            tensor,
        }
    }

    /// Split a dotted parameter name into owner and role.
    ///
    /// `encoder.layer1.weight` becomes (`encoder.layer1`, `weight`). A name
    /// without a dot is owned by the synthetic `model` owner.
    pub fn split_name(name: &str) -> (&str, &str) {
        match name.rsplit_once('.') {
            Some((owner, role)) if !owner.is_empty() && !role.is_empty() => (owner, role),
            _ => ("model", name),
        }
    }

    pub fn role_kind(&self) -> TensorRole {
        TensorRole::classify(&self.role)
    }
}

/// How a tensor role is treated by the quantizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorRole {
    /// Weight matrices and kernels: quantized at the configured width.
    Weight,
    /// Biases: quantized, floored at 8 bits in mixed-precision mode.
    Bias,
    /// Anything else (running statistics, counters): stored raw.
    Other,
}

impl TensorRole {
    /// Classify a role name.
    ///
    /// Matching is by substring so framework variants such as `kernel:0` or
    /// `weight_ih_l0` are recognised. "weight"/"kernel" take precedence over
    /// "bias".
    pub fn classify(role: &str) -> Self {
        if role.contains("weight") || role.contains("kernel") {
            Self::Weight
        } else if role.contains("bias") {
            Self::Bias
        } else {
            Self::Other
        }
    }

    /// Whether tensors of this role carry scale/zero-point/bits.
    pub fn is_quantized(&self) -> bool {
        matches!(self, Self::Weight | Self::Bias)
    }
}

/// Supported quantization bit widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum BitWidth {
    /// 4-bit unsigned integers, two per byte.
    B4,
    /// 8-bit unsigned integers.
    B8,
    /// IEEE 754 half precision.
    B16,
    /// f32 passthrough.
    B32,
}

impl BitWidth {
    pub fn bits(&self) -> u32 {
        match self {
            Self::B4 => 4,
            Self::B8 => 8,
            Self::B16 => 16,
            Self::B32 => 32,
        }
    }

    /// Largest integer level for integer widths.
    pub fn max_level(&self) -> Option<f32> {
        match self {
            Self::B4 => Some(15.0),
            Self::B8 => Some(255.0),
            Self::B16 | Self::B32 => None,
        }
    }

    /// Payload size in bytes for `n` elements.
    pub fn payload_len(&self, n: usize) -> usize {
        match self {
            Self::B4 => n.div_ceil(2),
            Self::B8 => n,
            Self::B16 => n * 2,
            Self::B32 => n * 4,
        }
    }

    /// [`Self::payload_len`] for untrusted counts; None on overflow.
    pub fn checked_payload_len(&self, n: usize) -> Option<usize> {
        match self {
            Self::B4 => Some(n.div_ceil(2)),
            Self::B8 => Some(n),
            Self::B16 => n.checked_mul(2),
            Self::B32 => n.checked_mul(4),
        }
    }
}

impl TryFrom<u32> for BitWidth {
    type Error = StorageError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            4 => Ok(Self::B4),
            8 => Ok(Self::B8),
            16 => Ok(Self::B16),
            32 => Ok(Self::B32),
            other => Err(StorageError::InvalidBitWidth(other)),
        }
    }
}

impl From<BitWidth> for u32 {
    fn from(value: BitWidth) -> Self {
        value.bits()
    }
}

impl std::fmt::Display for BitWidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_shape_mismatch() {
        let err = Tensor::new("fc.weight", vec![2, 3], vec![0.0; 5]).unwrap_err();
        assert!(matches!(
            err,
            StorageError::ShapeMismatch {
                expected: 6,
                actual: 5,
                ..
            }
        ));
    }

    #[test]
    fn test_scalar_tensor() {
        let t = Tensor::new("step", vec![], vec![3.0]).unwrap();
        assert_eq!(t.len(), 1);
        assert!(t.shape().is_empty());
    }

    #[test]
    fn test_min_max() {
        let t = Tensor::from_values("t", vec![0.5, -2.0, 3.5, 1.0]);
        assert_eq!(t.min_max(), Some((-2.0, 3.5)));
        assert_eq!(Tensor::from_values("e", vec![]).min_max(), None);
    }

    #[test]
    fn test_split_name() {
        assert_eq!(ExtractedTensor::split_name("encoder.fc1.weight"), ("encoder.fc1", "weight"));
        assert_eq!(ExtractedTensor::split_name("bias"), ("model", "bias"));
        assert_eq!(ExtractedTensor::split_name("trailing."), ("model", "trailing."));
    }

    #[test]
    fn test_role_classification() {
        assert_eq!(TensorRole::classify("weight"), TensorRole::Weight);
        assert_eq!(TensorRole::classify("kernel:0"), TensorRole::Weight);
        assert_eq!(TensorRole::classify("weight_ih_l0"), TensorRole::Weight);
        assert_eq!(TensorRole::classify("bias"), TensorRole::Bias);
        assert_eq!(TensorRole::classify("bias_hh_l0"), TensorRole::Bias);
        assert_eq!(TensorRole::classify("running_mean"), TensorRole::Other);
        assert_eq!(TensorRole::classify("num_batches_tracked"), TensorRole::Other);
        assert!(!TensorRole::Other.is_quantized());
    }

    #[test]
    fn test_bit_width_parse() {
        assert_eq!(BitWidth::try_from(4).unwrap(), BitWidth::B4);
        assert_eq!(BitWidth::try_from(32).unwrap(), BitWidth::B32);
        assert!(matches!(
            BitWidth::try_from(2),
            Err(StorageError::InvalidBitWidth(2))
        ));
    }

    #[test]
    fn test_bit_width_payload_len() {
        assert_eq!(BitWidth::B4.payload_len(5), 3);
        assert_eq!(BitWidth::B4.payload_len(4), 2);
        assert_eq!(BitWidth::B8.payload_len(5), 5);
        assert_eq!(BitWidth::B16.payload_len(5), 10);
        assert_eq!(BitWidth::B32.payload_len(5), 20);
    }

    #[test]
    fn test_checked_sizes_reject_overflow() {
        assert_eq!(checked_element_count(&[2, 3, 4]), Some(24));
        assert_eq!(checked_element_count(&[]), Some(1));
        assert_eq!(checked_element_count(&[usize::MAX, 2]), None);
        assert_eq!(BitWidth::B32.checked_payload_len(usize::MAX / 2), None);
        assert_eq!(BitWidth::B4.checked_payload_len(usize::MAX), Some(usize::MAX / 2 + 1));
    }

    #[test]
    fn test_bit_width_serde() {
        let json = serde_json::to_string(&BitWidth::B8).unwrap();
        assert_eq!(json, "8");
        let parsed: BitWidth = serde_json::from_str("16").unwrap();
        assert_eq!(parsed, BitWidth::B16);
        assert!(serde_json::from_str::<BitWidth>("3").is_err());
    }
}
