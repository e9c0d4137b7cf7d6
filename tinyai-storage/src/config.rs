//! Quantization configuration.
//!
//! `QuantizationConfig` is the serde-facing surface (config files, env
//! overrides, CLI flags). It is checked once with [`QuantizationConfig::validate`]
//! before any tensor is touched; the pipeline only ever sees a
//! [`ValidatedConfig`].

use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};
use crate::quant::Int8Overflow;
use crate::tensor::BitWidth;

/// Default quantization width.
pub const DEFAULT_QUANTIZE_BITS: u32 = 4;

/// Default seed for k-means centroid initialisation.
pub const DEFAULT_CLUSTER_SEED: u64 = 0;

/// Raw conversion settings as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizationConfig {
    /// Weight bit width: 4, 8, 16 or 32
    #[serde(default = "default_quantize_bits")]
    pub quantize_bits: u32,

    /// Floor biases at 8 bits
    #[serde(default)]
    pub mixed_precision: bool,

    /// Zero values with |v| <= threshold
    #[serde(default)]
    pub prune_threshold: Option<f32>,

    /// Number of k-means clusters for weight sharing
    #[serde(default)]
    pub weight_clustering: Option<i64>,

    /// Recorded in the artifact; has no effect on the encoding
    #[serde(default = "default_optimize")]
    pub optimize: bool,

    /// Handling of out-of-range 8-bit levels
    #[serde(default)]
    pub int8_overflow: Int8Overflow,

    /// Seed for deterministic clustering
    #[serde(default = "default_cluster_seed")]
    pub cluster_seed: u64,
}

fn default_quantize_bits() -> u32 {
    DEFAULT_QUANTIZE_BITS
}

fn default_optimize() -> bool {
    true
}

fn default_cluster_seed() -> u64 {
    DEFAULT_CLUSTER_SEED
}

impl Default for QuantizationConfig {
    fn default() -> Self {
        Self {
            quantize_bits: DEFAULT_QUANTIZE_BITS,
            mixed_precision: false,
            prune_threshold: None,
            weight_clustering: None,
            optimize: true,
            int8_overflow: Int8Overflow::default(),
            cluster_seed: DEFAULT_CLUSTER_SEED,
        }
    }
}

impl QuantizationConfig {
    /// Reject invalid settings, reporting the offending value.
    pub fn validate(&self) -> Result<ValidatedConfig> {
        let bits = BitWidth::try_from(self.quantize_bits)?;

        let clusters = match self.weight_clustering {
            Some(k) if k <= 0 => return Err(StorageError::InvalidClusterCount(k)),
            Some(k) => Some(usize::try_from(k).map_err(|_| StorageError::InvalidClusterCount(k))?),
            None => None,
        };

        if let Some(t) = self.prune_threshold {
            if !t.is_finite() || t < 0.0 {
                return Err(StorageError::InvalidPruneThreshold(t));
            }
        }

        Ok(ValidatedConfig {
            bits,
            mixed_precision: self.mixed_precision,
            prune_threshold: self.prune_threshold,
            weight_clustering: clusters,
            optimize: self.optimize,
            int8_overflow: self.int8_overflow,
            cluster_seed: self.cluster_seed,
        })
    }
}

/// Settings that passed validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidatedConfig {
    pub bits: BitWidth,
    pub mixed_precision: bool,
    pub prune_threshold: Option<f32>,
    pub weight_clustering: Option<usize>,
    pub optimize: bool,
    pub int8_overflow: Int8Overflow,
    pub cluster_seed: u64,
}

impl Default for ValidatedConfig {
    fn default() -> Self {
        Self {
            bits: BitWidth::B4,
            mixed_precision: false,
            prune_threshold: None,
            weight_clustering: None,
            optimize: true,
            int8_overflow: Int8Overflow::default(),
            cluster_seed: DEFAULT_CLUSTER_SEED,
        }
    }
}
