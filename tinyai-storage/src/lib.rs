//! TinyAI Storage - quantized weight artifacts.
//!
//! Turns f32 tensors into the two-file TinyAI artifact consumed by
//! constrained inference runtimes: a JSON metadata document and a flat
//! little-endian weight blob.
//!
//! # Encodings
//! - 32 bits: f32 passthrough
//! - 16 bits: IEEE half precision
//! - 8 bits: affine `u8` levels, zero point 0
//! - 4 bits: affine levels in `[0, 15]`, two per byte, high nibble first
//!
//! Tensors whose role is neither a weight nor a bias (running statistics,
//! counters) are stored as raw f32.
//!
//! # Usage
//! ```ignore
//! use tinyai_storage::{ArtifactBuilder, QuantizationConfig, SourceDescriptor, WeightStore};
//!
//! let config = QuantizationConfig::default().validate()?;
//! let mut weights = WeightStore::new();
//! for t in &tensors {
//!     weights.insert(&t.owner, &t.role, encode_for_role(t, config.bits, false, config.int8_overflow));
//! }
//! let artifact = ArtifactBuilder::new(source, structure, config).build(weights);
//! let paths = write_artifact(&serialize(&artifact)?, "out/model".as_ref())?;
//! ```

pub mod artifact;
pub mod config;
pub mod error;
pub mod formats;
pub mod quant;
pub mod reader;
pub mod serialize;
pub mod stats;
pub mod tensor;

// Re-exports
pub use artifact::{missing_weight_owners, ArtifactBuilder, ModelArtifact, SourceDescriptor, WeightStore};
pub use config::{QuantizationConfig, ValidatedConfig};
pub use error::{Result, StorageError};
pub use formats::{metadata_keys, ArtifactPaths, Encoding, MetadataDocument, TensorLayout, FORMAT_VERSION};
pub use quant::{
    decode_stored, dequantize, encode_for_role, quantize, select_bits, Int8Overflow, QuantizedTensor,
    RawTensor, StoredTensor,
};
pub use reader::ArtifactReader;
pub use serialize::{serialize, write_artifact, SerializedArtifact};
pub use stats::{report, ConversionStats, PipelineObservations};
pub use tensor::{element_count, BitWidth, ExtractedTensor, Tensor, TensorRole};
