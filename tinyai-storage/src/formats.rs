//! On-disk format of a TinyAI artifact.
//!
//! An artifact is a pair of files sharing a stem:
//! - `<stem>.json`: the metadata document (pretty-printed JSON)
//! - `<stem>.bin`: the weight blob
//!
//! Blob entry layout (all little-endian):
//! - shape: one `i32` per dimension (rank comes from the metadata index)
//! - quantized entries only: scale (`f32`), zero_point (`i32`), bits (`i32`)
//! - payload bytes
//!
//! `weight_offsets[owner][role]` points at the first shape byte of an entry.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::artifact::SourceDescriptor;
use crate::config::ValidatedConfig;
use crate::quant::Int8Overflow;

/// Artifact format version written to every metadata document.
pub const FORMAT_VERSION: &str = "1.0";

/// Metadata document key constants
pub mod metadata_keys {
    pub const FORMAT_VERSION: &str = "format_version";
    pub const SOURCE: &str = "source";
    pub const STRUCTURE: &str = "structure";
    pub const QUANTIZATION: &str = "quantization";
    /// owner -> role -> byte offset of the entry header
    pub const WEIGHT_OFFSETS: &str = "weight_offsets";
    /// owner -> role -> [`super::TensorLayout`]
    pub const TENSORS: &str = "tensors";
    /// Structure key holding the per-owner layer list
    pub const LAYERS: &str = "layers";
    /// Layer key listing declared parameters
    pub const PARAMETERS: &str = "parameters";
}

/// Size in bytes of one shape dimension in the blob.
pub const DIM_BYTES: usize = 4;

/// Size in bytes of the scale/zero_point/bits trailer of a quantized entry.
pub const QUANT_HEADER_BYTES: usize = 12;

/// Per-entry header preceding the payload in the blob.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryHeader {
    /// Shape dimensions as written (i32 on disk)
    pub dims: Vec<i32>,
    pub quant: Option<QuantHeader>,
}

/// Quantization parameters of a quantized entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantHeader {
    pub scale: f32,
    pub zero_point: i32,
    pub bits: i32,
}

impl EntryHeader {
    /// Write header to writer
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for dim in &self.dims {
            w.write_all(&dim.to_le_bytes())?;
        }
        if let Some(q) = self.quant {
            w.write_all(&q.scale.to_le_bytes())?;
            w.write_all(&q.zero_point.to_le_bytes())?;
            w.write_all(&q.bits.to_le_bytes())?;
        }
        Ok(())
    }

    /// Read header from reader.
    ///
    /// The blob is not self-describing: rank and encoding come from the
    /// metadata index.
    pub fn read_from<R: Read>(r: &mut R, rank: usize, quantized: bool) -> io::Result<Self> {
        let mut dims = Vec::with_capacity(rank);
        for _ in 0..rank {
            dims.push(i32::from_le_bytes(read_word(r)?));
        }

        let quant = if quantized {
            let scale = f32::from_le_bytes(read_word(r)?);
            let zero_point = i32::from_le_bytes(read_word(r)?);
            let bits = i32::from_le_bytes(read_word(r)?);
            Some(QuantHeader {
                scale,
                zero_point,
                bits,
            })
        } else {
            None
        };

        Ok(Self { dims, quant })
    }
}

fn read_word<R: Read>(r: &mut R) -> io::Result<[u8; 4]> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Header length for an entry of the given rank.
pub fn header_len(rank: usize, quantized: bool) -> usize {
    rank * DIM_BYTES + if quantized { QUANT_HEADER_BYTES } else { 0 }
}

/// How an entry's payload is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// Affine/float quantized, header carries scale, zero_point and bits
    Quantized,
    /// Little-endian f32, no quantization header
    RawF32,
}

/// Location and shape of one blob entry, recorded in the `tensors` index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorLayout {
    /// Offset of the entry header (same as `weight_offsets`)
    pub offset: u64,
    pub shape: Vec<usize>,
    pub encoding: Encoding,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bits: Option<u32>,
    /// Offset of the first payload byte
    pub payload_offset: u64,
    pub payload_len: u64,
}

impl TensorLayout {
    /// End of the entry (exclusive); None if the recorded range overflows.
    pub fn end(&self) -> Option<u64> {
        self.payload_offset.checked_add(self.payload_len)
    }
}

/// Pruning block of the quantization section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PruningInfo {
    pub threshold: f32,
}

/// Clustering block of the quantization section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusteringInfo {
    pub num_clusters: usize,
}

/// Quantization section of the metadata document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizationInfo {
    pub bits: u32,
    pub mixed_precision: bool,
    pub optimize: bool,
    pub int8_overflow: Int8Overflow,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pruning: Option<PruningInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clustering: Option<ClusteringInfo>,
}

impl From<&ValidatedConfig> for QuantizationInfo {
    fn from(config: &ValidatedConfig) -> Self {
        Self {
            bits: config.bits.bits(),
            mixed_precision: config.mixed_precision,
            optimize: config.optimize,
            int8_overflow: config.int8_overflow,
            pruning: config.prune_threshold.map(|threshold| PruningInfo { threshold }),
            clustering: config
                .weight_clustering
                .map(|num_clusters| ClusteringInfo { num_clusters }),
        }
    }
}

/// owner -> role -> value, ordered lexicographically.
pub type OwnerMap<T> = BTreeMap<String, BTreeMap<String, T>>;

/// The `<stem>.json` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataDocument {
    pub format_version: String,
    pub source: SourceDescriptor,
    /// Framework-specific structure, passed through untouched
    pub structure: serde_json::Value,
    pub quantization: QuantizationInfo,
    pub weight_offsets: OwnerMap<u64>,
    pub tensors: OwnerMap<TensorLayout>,
}

impl MetadataDocument {
    /// Layout of one entry
    pub fn layout(&self, owner: &str, role: &str) -> Option<&TensorLayout> {
        self.tensors.get(owner).and_then(|roles| roles.get(role))
    }

    /// All entries in blob order
    pub fn layouts(&self) -> impl Iterator<Item = (&str, &str, &TensorLayout)> {
        self.tensors.iter().flat_map(|(owner, roles)| {
            roles
                .iter()
                .map(move |(role, layout)| (owner.as_str(), role.as_str(), layout))
        })
    }
}

/// The two file paths of an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub metadata: PathBuf,
    pub blob: PathBuf,
}

impl ArtifactPaths {
    /// Derive `<stem>.json` and `<stem>.bin` from an output path.
    ///
    /// Any extension on `output` is replaced; `out/model` and
    /// `out/model.tinyai` both give `out/model.json` + `out/model.bin`.
    pub fn from_output(output: &Path) -> Self {
        Self {
            metadata: output.with_extension("json"),
            blob: output.with_extension("bin"),
        }
    }

    /// Directory both files live in
    pub fn parent(&self) -> &Path {
        match self.metadata.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }
}
