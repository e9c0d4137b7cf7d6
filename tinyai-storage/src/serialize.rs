//! Artifact serialization and atomic two-file write.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::artifact::ModelArtifact;
use crate::error::{Result, StorageError};
use crate::formats::{
    ArtifactPaths, Encoding, EntryHeader, MetadataDocument, OwnerMap, QuantHeader, QuantizationInfo,
    TensorLayout,
};
use crate::quant::StoredTensor;

/// Metadata document and blob, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedArtifact {
    pub metadata: MetadataDocument,
    pub blob: Vec<u8>,
}

impl SerializedArtifact {
    /// Pretty-printed metadata JSON
    pub fn metadata_json(&self) -> Result<Vec<u8>> {
        let mut json = serde_json::to_vec_pretty(&self.metadata)?;
        json.push(b'\n');
        Ok(json)
    }
}

/// Lay out the weight store into a blob and build the metadata document.
///
/// Entries are written owner by owner, role by role, in lexicographic order.
pub fn serialize(artifact: &ModelArtifact) -> Result<SerializedArtifact> {
    let mut blob = Vec::with_capacity(artifact.weights.payload_bytes());
    let mut weight_offsets = OwnerMap::new();
    let mut tensors = OwnerMap::new();

    for (owner, role, entry) in artifact.weights.iter() {
        let offset = blob.len() as u64;
        let header = entry_header(owner, role, entry)?;
        header
            .write_to(&mut blob)
            .map_err(|e| StorageError::Format(format!("{owner}.{role}: {e}")))?;
        let payload_offset = blob.len() as u64;
        blob.extend_from_slice(entry.payload());

        let layout = TensorLayout {
            offset,
            shape: entry.shape().to_vec(),
            encoding: match entry {
                StoredTensor::Quantized(_) => Encoding::Quantized,
                StoredTensor::Raw(_) => Encoding::RawF32,
            },
            bits: entry.bits().map(u32::from),
            payload_offset,
            payload_len: entry.payload().len() as u64,
        };

        weight_offsets
            .entry(owner.to_string())
            .or_default()
            .insert(role.to_string(), offset);
        tensors
            .entry(owner.to_string())
            .or_default()
            .insert(role.to_string(), layout);
    }

    tracing::debug!(
        entries = artifact.weights.len(),
        blob_bytes = blob.len(),
        "Serialized weight store"
    );

    Ok(SerializedArtifact {
        metadata: MetadataDocument {
            format_version: artifact.format_version.clone(),
            source: artifact.source.clone(),
            structure: artifact.structure.clone(),
            quantization: QuantizationInfo::from(&artifact.quantization),
            weight_offsets,
            tensors,
        },
        blob,
    })
}

fn entry_header(owner: &str, role: &str, entry: &StoredTensor) -> Result<EntryHeader> {
    let dims = entry
        .shape()
        .iter()
        .map(|&dim| {
            i32::try_from(dim).map_err(|_| StorageError::DimensionOverflow {
                owner: owner.to_string(),
                role: role.to_string(),
                dim,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let quant = entry.as_quantized().map(|q| QuantHeader {
        scale: q.scale,
        zero_point: q.zero_point,
        bits: q.bits.bits() as i32,
    });

    Ok(EntryHeader { dims, quant })
}

/// Write `<stem>.json` and `<stem>.bin` next to `output`.
///
/// Both files are staged as temporaries in the destination directory and
/// renamed into place, blob first. Metadata from an earlier write is removed
/// before the new blob lands, so an old document never describes a new
/// blob. On failure no metadata file is left behind and a blob persisted by
/// this call is removed.
pub fn write_artifact(artifact: &SerializedArtifact, output: &Path) -> Result<ArtifactPaths> {
    let paths = ArtifactPaths::from_output(output);
    let dir = paths.parent().to_path_buf();
    fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;

    let metadata_json = artifact.metadata_json()?;
    let blob_tmp = stage(&dir, &artifact.blob)?;
    let metadata_tmp = stage(&dir, &metadata_json)?;

    retire_metadata(&paths.metadata)?;
    blob_tmp
        .persist(&paths.blob)
        .map_err(|e| StorageError::io(&paths.blob, e.error))?;

    if let Err(e) = metadata_tmp.persist(&paths.metadata) {
        if let Err(cleanup) = fs::remove_file(&paths.blob) {
            tracing::warn!(path = %paths.blob.display(), error = %cleanup, "Failed to remove orphaned blob");
        }
        return Err(StorageError::io(&paths.metadata, e.error));
    }

    tracing::info!(path = %paths.metadata.display(), bytes = metadata_json.len(), "Wrote metadata");
    tracing::info!(path = %paths.blob.display(), bytes = artifact.blob.len(), "Wrote weights");

    Ok(paths)
}

/// Remove a previously written `<stem>.json`, if any.
fn retire_metadata(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Removed previous metadata");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

fn stage(dir: &Path, bytes: &[u8]) -> Result<NamedTempFile> {
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StorageError::io(dir, e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| StorageError::io(tmp.path(), e))?;
    Ok(tmp)
}
