//! Read a written artifact back: resolve offsets, decode entries.

use std::fs;
use std::path::Path;

use crate::error::{Result, StorageError};
use crate::formats::{header_len, ArtifactPaths, Encoding, EntryHeader, MetadataDocument, TensorLayout};
use crate::quant::{decode_stored, QuantizedTensor, RawTensor, StoredTensor};
use crate::tensor::{checked_element_count, BitWidth};

/// A loaded `<stem>.json` + `<stem>.bin` pair.
#[derive(Debug, Clone)]
pub struct ArtifactReader {
    metadata: MetadataDocument,
    blob: Vec<u8>,
}

impl ArtifactReader {
    /// Load both files derived from `output`.
    pub fn open(output: &Path) -> Result<Self> {
        let paths = ArtifactPaths::from_output(output);
        let json = fs::read(&paths.metadata).map_err(|e| StorageError::io(&paths.metadata, e))?;
        let metadata: MetadataDocument = serde_json::from_slice(&json)?;
        let blob = fs::read(&paths.blob).map_err(|e| StorageError::io(&paths.blob, e))?;
        Self::from_parts(metadata, blob)
    }

    /// Wrap an in-memory document and blob, checking every entry fits.
    pub fn from_parts(metadata: MetadataDocument, blob: Vec<u8>) -> Result<Self> {
        for (owner, role, layout) in metadata.layouts() {
            let bad = |msg: String| StorageError::Format(format!("{owner}.{role}: {msg}"));
            let recorded = metadata
                .weight_offsets
                .get(owner)
                .and_then(|roles| roles.get(role));
            if recorded != Some(&layout.offset) {
                return Err(bad("weight_offsets disagrees with tensor index".to_string()));
            }
            let span = EntrySpan::of(layout).map_err(bad)?;
            if span.end > blob.len() {
                return Err(bad(format!(
                    "entry ends at {} past blob length {}",
                    span.end,
                    blob.len()
                )));
            }
        }
        Ok(Self { metadata, blob })
    }

    pub fn metadata(&self) -> &MetadataDocument {
        &self.metadata
    }

    pub fn blob_len(&self) -> usize {
        self.blob.len()
    }

    /// Layout of one entry.
    pub fn entry(&self, owner: &str, role: &str) -> Result<&TensorLayout> {
        self.metadata
            .layout(owner, role)
            .ok_or_else(|| StorageError::MissingEntry {
                owner: owner.to_string(),
                role: role.to_string(),
            })
    }

    /// Decode an entry from its bytes in the blob.
    pub fn tensor(&self, owner: &str, role: &str) -> Result<StoredTensor> {
        let layout = self.entry(owner, role)?;
        let bad = |msg: String| StorageError::Format(format!("{owner}.{role}: {msg}"));

        let span = EntrySpan::of(layout).map_err(bad)?;
        if span.end > self.blob.len() {
            return Err(bad(format!("entry ends past blob length {}", self.blob.len())));
        }
        let quantized = layout.encoding == Encoding::Quantized;
        let rank = layout.shape.len();

        let mut cursor = &self.blob[span.start..span.payload_start];
        let header = EntryHeader::read_from(&mut cursor, rank, quantized).map_err(|e| bad(e.to_string()))?;

        let dims_match = header
            .dims
            .iter()
            .zip(&layout.shape)
            .all(|(&d, &s)| usize::try_from(d).is_ok_and(|d| d == s));
        if !dims_match {
            return Err(bad(format!(
                "header shape {:?} disagrees with index shape {:?}",
                header.dims, layout.shape
            )));
        }

        let n = span.elements;
        let payload = self.blob[span.payload_start..span.end].to_vec();

        match header.quant {
            Some(q) => {
                let bits = u32::try_from(q.bits)
                    .ok()
                    .and_then(|b| BitWidth::try_from(b).ok())
                    .ok_or_else(|| bad(format!("invalid bit width {} in header", q.bits)))?;
                if layout.bits != Some(bits.bits()) {
                    return Err(bad(format!(
                        "header bits {bits} disagree with index {:?}",
                        layout.bits
                    )));
                }
                if bits.checked_payload_len(n) != Some(payload.len()) {
                    return Err(bad(format!(
                        "payload length {} does not match {n} elements at {bits} bits",
                        payload.len()
                    )));
                }
                Ok(QuantizedTensor {
                    shape: layout.shape.clone(),
                    bits,
                    scale: q.scale,
                    zero_point: q.zero_point,
                    payload,
                }
                .into())
            }
            None => {
                if n.checked_mul(4) != Some(payload.len()) {
                    return Err(bad(format!(
                        "raw payload length {} does not match {n} f32 elements",
                        payload.len()
                    )));
                }
                Ok(RawTensor {
                    shape: layout.shape.clone(),
                    payload,
                }
                .into())
            }
        }
    }

    /// Reconstructed f32 values of an entry.
    pub fn dequantize(&self, owner: &str, role: &str) -> Result<Vec<f32>> {
        self.tensor(owner, role).map(|t| decode_stored(&t))
    }
}

/// Byte range of one entry, derived from its index record with checked
/// arithmetic. The metadata file is untrusted input.
#[derive(Debug, Clone, Copy)]
struct EntrySpan {
    start: usize,
    payload_start: usize,
    end: usize,
    elements: usize,
}

impl EntrySpan {
    fn of(layout: &TensorLayout) -> std::result::Result<Self, String> {
        let to_usize = |v: u64, what: &str| {
            usize::try_from(v).map_err(|_| format!("{what} {v} exceeds the address space"))
        };
        let start = to_usize(layout.offset, "offset")?;
        let payload_start = to_usize(layout.payload_offset, "payload offset")?;
        let end = layout
            .end()
            .ok_or_else(|| {
                format!(
                    "payload range {} + {} overflows",
                    layout.payload_offset, layout.payload_len
                )
            })
            .and_then(|end| to_usize(end, "entry end"))?;

        let quantized = layout.encoding == Encoding::Quantized;
        let header_end = start.checked_add(header_len(layout.shape.len(), quantized));
        if header_end != Some(payload_start) {
            return Err(format!(
                "payload offset {payload_start} does not follow header at {start}"
            ));
        }

        let elements = checked_element_count(&layout.shape)
            .ok_or_else(|| format!("shape {:?} overflows the element count", layout.shape))?;
        let expected = match layout.encoding {
            Encoding::Quantized => {
                let bits = layout
                    .bits
                    .and_then(|b| BitWidth::try_from(b).ok())
                    .ok_or_else(|| format!("invalid bit width {:?} in index", layout.bits))?;
                bits.checked_payload_len(elements)
            }
            Encoding::RawF32 => elements.checked_mul(4),
        };
        if expected.and_then(|len| u64::try_from(len).ok()) != Some(layout.payload_len) {
            return Err(format!(
                "payload length {} does not match shape {:?}",
                layout.payload_len, layout.shape
            ));
        }

        Ok(Self {
            start,
            payload_start,
            end,
            elements,
        })
    }
}
