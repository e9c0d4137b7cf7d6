//! Conversion statistics.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::artifact::ModelArtifact;
use crate::tensor::ExtractedTensor;

/// Facts gathered while the pipeline ran, beyond what the artifact records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineObservations {
    /// Elements in tensors that went through the pruner
    pub pruned_elements: usize,
    /// Elements the pruner set to zero
    pub zeroed_elements: usize,
    /// Tensors whose values were replaced by cluster centroids
    pub clustered_tensors: usize,
}

impl PipelineObservations {
    pub fn record_pruning(&mut self, zeroed: usize, total: usize) {
        self.zeroed_elements += zeroed;
        self.pruned_elements += total;
    }

    /// Combine observations from independent workers.
    pub fn merge(self, other: Self) -> Self {
        Self {
            pruned_elements: self.pruned_elements + other.pruned_elements,
            zeroed_elements: self.zeroed_elements + other.zeroed_elements,
            clustered_tensors: self.clustered_tensors + other.clustered_tensors,
        }
    }

    /// Zeroed fraction across pruned tensors, None when nothing was pruned.
    pub fn overall_sparsity(&self) -> Option<f64> {
        (self.pruned_elements > 0).then(|| self.zeroed_elements as f64 / self.pruned_elements as f64)
    }
}

/// Summary of one conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionStats {
    pub framework: String,
    pub framework_version: String,
    pub model_type: String,
    pub num_layers: usize,
    pub num_tensors: usize,
    pub num_parameters: usize,
    pub original_size_bytes: usize,
    pub converted_size_bytes: usize,
    pub compression_ratio: f64,
    pub quantization_bits: u32,
    pub mixed_precision: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pruning_threshold: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_clustering_clusters: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_sparsity: Option<f64>,
}

/// Gather statistics for a finished conversion.
///
/// The original size assumes 4 bytes per input element; the converted size
/// counts payload bytes only, without entry headers.
pub fn report(
    original: &[ExtractedTensor],
    artifact: &ModelArtifact,
    observations: &PipelineObservations,
) -> ConversionStats {
    let num_parameters: usize = original.iter().map(|t| t.tensor.len()).sum();
    let original_size_bytes = num_parameters * 4;
    let converted_size_bytes = artifact.weights.payload_bytes();

    let compression_ratio = if converted_size_bytes > 0 {
        original_size_bytes as f64 / converted_size_bytes as f64
    } else {
        0.0
    };

    let config = &artifact.quantization;
    ConversionStats {
        framework: artifact.source.framework.clone(),
        framework_version: artifact.source.version.clone(),
        model_type: artifact.source.model_type.clone(),
        num_layers: artifact.num_layers(),
        num_tensors: original.len(),
        num_parameters,
        original_size_bytes,
        converted_size_bytes,
        compression_ratio,
        quantization_bits: config.bits.bits(),
        mixed_precision: config.mixed_precision,
        pruning_threshold: config.prune_threshold,
        weight_clustering_clusters: config.weight_clustering,
        overall_sparsity: observations.overall_sparsity(),
    }
}

impl fmt::Display for ConversionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Conversion summary:")?;
        writeln!(
            f,
            "  Source:             {} {} ({})",
            self.framework, self.framework_version, self.model_type
        )?;
        writeln!(f, "  Layers:             {}", self.num_layers)?;
        writeln!(f, "  Tensors:            {}", self.num_tensors)?;
        writeln!(f, "  Parameters:         {}", self.num_parameters)?;
        writeln!(f, "  Original size:      {} bytes", self.original_size_bytes)?;
        writeln!(f, "  Converted size:     {} bytes", self.converted_size_bytes)?;
        writeln!(f, "  Compression ratio:  {:.2}x", self.compression_ratio)?;
        write!(
            f,
            "  Quantization:       {} bits{}",
            self.quantization_bits,
            if self.mixed_precision { " (mixed precision)" } else { "" }
        )?;
        if let Some(t) = self.pruning_threshold {
            write!(f, "\n  Pruning threshold:  {t}")?;
        }
        if let Some(s) = self.overall_sparsity {
            write!(f, "\n  Sparsity:           {:.1}%", s * 100.0)?;
        }
        if let Some(k) = self.weight_clustering_clusters {
            write!(f, "\n  Weight clusters:    {k}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{ArtifactBuilder, SourceDescriptor, WeightStore};
    use crate::config::{QuantizationConfig, ValidatedConfig};
    use crate::quant::{encode_for_role, Int8Overflow};
    use crate::tensor::{BitWidth, Tensor};
    use serde_json::json;

    fn extracted() -> Vec<ExtractedTensor> {
        vec![
            ExtractedTensor::new("fc", "weight", Tensor::from_values("fc.weight", vec![0.5; 8])),
            ExtractedTensor::new("fc", "bias", Tensor::from_values("fc.bias", vec![0.1; 2])),
        ]
    }

    fn build(config: ValidatedConfig, tensors: &[ExtractedTensor]) -> ModelArtifact {
        let weights: WeightStore = tensors
            .iter()
            .map(|t| {
                let stored = encode_for_role(t, config.bits, config.mixed_precision, Int8Overflow::Wrap);
                (t.owner.clone(), t.role.clone(), stored)
            })
            .collect();
        ArtifactBuilder::new(
            SourceDescriptor::new("safetensors", "1", "mlp"),
            json!({"layers": [{"name": "fc"}]}),
            config,
        )
        .build(weights)
    }

    #[test]
    fn test_compression_ratio() {
        let tensors = extracted();
        let artifact = build(ValidatedConfig::default(), &tensors);
        let stats = report(&tensors, &artifact, &PipelineObservations::default());

        assert_eq!(stats.num_tensors, 2);
        assert_eq!(stats.num_parameters, 10);
        assert_eq!(stats.original_size_bytes, 40);
        // 8 weights at 4 bits + 2 biases at 4 bits
        assert_eq!(stats.converted_size_bytes, 5);
        assert_eq!(stats.compression_ratio, 8.0);
        assert_eq!(stats.num_layers, 1);
        assert_eq!(stats.quantization_bits, 4);
        assert!(stats.overall_sparsity.is_none());
    }

    #[test]
    fn test_mixed_precision_changes_converted_size() {
        let tensors = extracted();
        let config = QuantizationConfig {
            mixed_precision: true,
            ..Default::default()
        }
        .validate()
        .unwrap();
        let stats = report(&tensors, &build(config, &tensors), &PipelineObservations::default());
        // biases at 8 bits
        assert_eq!(stats.converted_size_bytes, 6);
        assert!(stats.mixed_precision);
    }

    #[test]
    fn test_zero_converted_size_gives_zero_ratio() {
        let artifact = build(ValidatedConfig::default(), &[]);
        let stats = report(&[], &artifact, &PipelineObservations::default());
        assert_eq!(stats.converted_size_bytes, 0);
        assert_eq!(stats.compression_ratio, 0.0);
    }

    #[test]
    fn test_pass_through_settings_and_sparsity() {
        let config = ValidatedConfig {
            bits: BitWidth::B8,
            prune_threshold: Some(0.05),
            weight_clustering: Some(4),
            ..Default::default()
        };
        let tensors = extracted();
        let mut obs = PipelineObservations::default();
        obs.record_pruning(2, 8);
        obs = obs.merge(PipelineObservations {
            pruned_elements: 2,
            zeroed_elements: 0,
            clustered_tensors: 1,
        });

        let stats = report(&tensors, &build(config, &tensors), &obs);
        assert_eq!(stats.pruning_threshold, Some(0.05));
        assert_eq!(stats.weight_clustering_clusters, Some(4));
        assert_eq!(stats.overall_sparsity, Some(0.2));

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["weight_clustering_clusters"], 4);
        assert!(stats.to_string().contains("Sparsity:           20.0%"));
    }
}
