//! Convert command: SafeTensors -> TinyAI artifact.
//!
//! Each tensor is pruned, clustered and quantized independently on the rayon
//! pool. Results are gathered into the ordered weight store before anything
//! is serialized, so the blob layout never depends on scheduling.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use rayon::prelude::*;
use tinyai_machete::{cluster, prune, Clusterer, LloydKMeans};
use tinyai_storage::{
    encode_for_role, report, serialize, write_artifact, ArtifactBuilder, ConversionStats,
    ExtractedTensor, PipelineObservations, StoredTensor, ValidatedConfig, WeightStore,
};

use crate::common::runtime::{build_thread_pool, ProgressTracker};
use crate::frontend;
use crate::settings::{self, Overrides};

/// Inputs of one conversion run.
#[derive(Debug, Clone)]
pub struct ConvertArgs {
    pub model: PathBuf,
    pub output: PathBuf,
    pub config: Option<PathBuf>,
    pub flags: Overrides,
    pub threads: Option<usize>,
    pub stats_json: Option<PathBuf>,
    pub show_progress: bool,
}

/// Weight store plus what the pipeline observed while filling it.
#[derive(Debug)]
pub struct Converted {
    pub weights: WeightStore,
    pub observations: PipelineObservations,
}

/// Run the full conversion and print a summary.
pub fn run(args: &ConvertArgs) -> Result<ConversionStats> {
    let config = settings::resolve(
        args.config.as_deref(),
        &Overrides::from_process_env(),
        &args.flags,
    )?;
    let config = config.validate().context("Invalid conversion settings")?;

    println!("Model: {}", args.model.display());
    println!(
        "Quantization: {} bits{}",
        config.bits,
        if config.mixed_precision { " (mixed precision)" } else { "" }
    );

    let model = frontend::load_safetensors(&args.model)?;
    tracing::debug!(
        files = model.files.len(),
        tensors = model.tensors.len(),
        skipped = model.skipped.len(),
        "Loaded model"
    );
    if model.tensors.is_empty() {
        tracing::warn!("No float tensors found; writing an empty artifact");
    }

    let pool = build_thread_pool(args.threads)?;
    println!("Processing {} tensors...", model.tensors.len());
    let converted = pool.install(|| convert_tensors(&model.tensors, &config, args.show_progress))?;

    let source = model.source.clone().stamped_now();
    let artifact = ArtifactBuilder::new(source, model.structure.clone(), config).build(converted.weights);
    let serialized = serialize(&artifact)?;
    let paths = write_artifact(&serialized, &args.output)
        .with_context(|| format!("Failed to write artifact: {}", args.output.display()))?;

    let stats = report(&model.tensors, &artifact, &converted.observations);

    println!("\n=== Conversion Complete ===");
    println!("Metadata: {}", paths.metadata.display());
    println!("Weights:  {} ({} bytes)", paths.blob.display(), serialized.blob.len());
    println!("{stats}");

    if let Some(path) = &args.stats_json {
        let json = serde_json::to_string_pretty(&stats)?;
        fs::write(path, json + "\n")
            .with_context(|| format!("Failed to write stats: {}", path.display()))?;
        println!("Stats: {}", path.display());
    }

    Ok(stats)
}

/// Prune, cluster and encode every tensor on the current rayon pool.
pub fn convert_tensors(
    tensors: &[ExtractedTensor],
    config: &ValidatedConfig,
    show_progress: bool,
) -> Result<Converted> {
    let clusterer = LloydKMeans::with_seed(config.cluster_seed);
    let progress = ProgressTracker::new(tensors.len(), "Quantizing").quiet(!show_progress);

    let processed = tensors
        .par_iter()
        .map(|t| {
            let (stored, obs) = process_tensor(t, config, &clusterer)
                .with_context(|| format!("Failed to convert tensor: {}", t.tensor.name()))?;
            progress.increment_every(16);
            Ok((t.owner.clone(), t.role.clone(), stored, obs))
        })
        .collect::<Result<Vec<_>>>()?;
    progress.finish();

    let mut weights = WeightStore::new();
    let mut observations = PipelineObservations::default();
    for (owner, role, stored, obs) in processed {
        if weights.insert(owner.as_str(), role.as_str(), stored).is_some() {
            tracing::warn!(owner = %owner, role = %role, "Duplicate tensor, keeping the last one");
        }
        observations = observations.merge(obs);
    }

    Ok(Converted {
        weights,
        observations,
    })
}

fn process_tensor(
    extracted: &ExtractedTensor,
    config: &ValidatedConfig,
    clusterer: &dyn Clusterer,
) -> Result<(StoredTensor, PipelineObservations)> {
    let mut obs = PipelineObservations::default();
    let mut tensor = extracted.tensor.clone();

    if let Some(threshold) = config.prune_threshold {
        let pruned = prune(tensor, threshold);
        obs.record_pruning(pruned.zeroed, pruned.tensor.len());
        tensor = pruned.tensor;
    }

    if let Some(k) = config.weight_clustering {
        let clustered = cluster(tensor, k, clusterer)?;
        if clustered.centroids.is_some() {
            obs.clustered_tensors += 1;
        }
        tensor = clustered.tensor;
    }

    let staged = ExtractedTensor::new(extracted.owner.as_str(), extracted.role.as_str(), tensor);
    let stored = encode_for_role(&staged, config.bits, config.mixed_precision, config.int8_overflow);
    Ok((stored, obs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinyai_machete::distinct_count;
    use tinyai_storage::{decode_stored, BitWidth, QuantizationConfig, Tensor};

    fn tensors() -> Vec<ExtractedTensor> {
        vec![
            ExtractedTensor::new(
                "fc",
                "weight",
                Tensor::new("fc.weight", vec![2, 4], vec![0.01, 0.2, -0.01, 0.3, 0.5, -0.5, 0.25, 0.75]).unwrap(),
            ),
            ExtractedTensor::new("fc", "bias", Tensor::from_values("fc.bias", vec![0.1, -0.1])),
            ExtractedTensor::new("bn", "running_mean", Tensor::from_values("bn.running_mean", vec![0.5, 1.5])),
        ]
    }

    fn config(f: impl FnOnce(&mut QuantizationConfig)) -> ValidatedConfig {
        let mut c = QuantizationConfig::default();
        f(&mut c);
        c.validate().unwrap()
    }

    #[test]
    fn test_default_conversion() {
        let converted = convert_tensors(&tensors(), &ValidatedConfig::default(), false).unwrap();
        let w = &converted.weights;

        assert_eq!(w.len(), 3);
        assert_eq!(w.get("fc", "weight").unwrap().bits(), Some(BitWidth::B4));
        assert_eq!(w.get("fc", "bias").unwrap().bits(), Some(BitWidth::B4));
        assert!(w.get("bn", "running_mean").unwrap().bits().is_none());
        assert_eq!(converted.observations, PipelineObservations::default());
    }

    #[test]
    fn test_mixed_precision_biases() {
        let cfg = config(|c| {
            c.quantize_bits = 16;
            c.mixed_precision = true;
        });
        let converted = convert_tensors(&tensors(), &cfg, false).unwrap();
        assert_eq!(converted.weights.get("fc", "weight").unwrap().bits(), Some(BitWidth::B16));
        assert_eq!(converted.weights.get("fc", "bias").unwrap().bits(), Some(BitWidth::B8));
    }

    #[test]
    fn test_pruning_is_observed() {
        let cfg = config(|c| {
            c.quantize_bits = 32;
            c.prune_threshold = Some(0.05);
        });
        let converted = convert_tensors(&tensors(), &cfg, false).unwrap();

        let weight = decode_stored(converted.weights.get("fc", "weight").unwrap());
        assert_eq!(&weight[..4], &[0.0, 0.2, 0.0, 0.3]);
        // two weights zeroed out of 12 elements
        assert_eq!(converted.observations.zeroed_elements, 2);
        assert_eq!(converted.observations.pruned_elements, 12);
    }

    #[test]
    fn test_clustering_limits_distinct_values() {
        let cfg = config(|c| {
            c.quantize_bits = 32;
            c.weight_clustering = Some(2);
        });
        let converted = convert_tensors(&tensors(), &cfg, false).unwrap();

        let weight = decode_stored(converted.weights.get("fc", "weight").unwrap());
        assert!(distinct_count(&weight) <= 2);
        // bias and running_mean already have two distinct values
        assert_eq!(converted.observations.clustered_tensors, 1);
    }

    #[test]
    fn test_parallel_result_is_deterministic() {
        let cfg = config(|c| {
            c.quantize_bits = 8;
            c.weight_clustering = Some(3);
        });
        let a = convert_tensors(&tensors(), &cfg, false).unwrap();
        let b = convert_tensors(&tensors(), &cfg, false).unwrap();
        assert_eq!(a.weights, b.weights);
    }
}
