//! Inspect command: summarize a written artifact.

use std::path::Path;

use anyhow::{Context, Result};
use tinyai_machete::{analyze, SparsityReport};
use tinyai_storage::{ArtifactReader, Encoding};

/// Print the artifact header and one line per blob entry.
///
/// With `tensor` set (`owner.role`), also print its first `limit` values.
pub fn run(artifact: &Path, tensor: Option<&str>, limit: usize) -> Result<()> {
    let reader = ArtifactReader::open(artifact)
        .with_context(|| format!("Failed to open artifact: {}", artifact.display()))?;
    let meta = reader.metadata();

    println!("Format version: {}", meta.format_version);
    println!(
        "Source: {} {} ({})",
        meta.source.framework, meta.source.version, meta.source.model_type
    );
    if let Some(at) = &meta.source.converted_at {
        println!("Converted at: {at}");
    }
    println!(
        "Quantization: {} bits, mixed precision {}, int8 overflow {:?}",
        meta.quantization.bits, meta.quantization.mixed_precision, meta.quantization.int8_overflow
    );
    if let Some(p) = &meta.quantization.pruning {
        println!("Pruning threshold: {}", p.threshold);
    }
    if let Some(c) = &meta.quantization.clustering {
        println!("Weight clusters: {}", c.num_clusters);
    }
    println!("Blob: {} bytes\n", reader.blob_len());

    let mut overall = SparsityReport::default();
    for (owner, role, layout) in meta.layouts() {
        let values = reader.dequantize(owner, role)?;
        let report = analyze(&values);
        overall = overall.merge(report);
        let sparsity = report.sparsity();
        let encoding = match (layout.encoding, layout.bits) {
            (Encoding::Quantized, Some(bits)) => format!("q{bits}"),
            _ => "f32".to_string(),
        };
        println!(
            "  {owner}.{role:<20} {encoding:>4} {:?} @{} ({} bytes, sparsity={:.1}%)",
            layout.shape,
            layout.offset,
            layout.payload_len,
            sparsity * 100.0
        );
    }
    println!(
        "\nOverall sparsity: {:.1}% ({} of {} values are zero)",
        overall.sparsity() * 100.0,
        overall.zeros,
        overall.total
    );

    if let Some(name) = tensor {
        let (owner, role) = tinyai_storage::ExtractedTensor::split_name(name);
        let values = reader.dequantize(owner, role)?;
        let shown = values.len().min(limit);
        println!("\n{name}: {} values, showing {shown}", values.len());
        println!("{:?}", &values[..shown]);
    }

    Ok(())
}
