//! Magnitude pruning.

use tinyai_storage::Tensor;

/// A pruned tensor and how much of it is now zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Pruned {
    pub tensor: Tensor,
    /// Elements with `|v| <= threshold`
    pub zeroed: usize,
    /// `zeroed / total`, 0 for an empty tensor
    pub sparsity: f64,
}

/// Zero every element with `|v| <= threshold`. Shape is unchanged.
pub fn prune(tensor: Tensor, threshold: f32) -> Pruned {
    let mut zeroed = 0usize;
    let values: Vec<f32> = tensor
        .values()
        .iter()
        .map(|&v| {
            if v.abs() <= threshold {
                zeroed += 1;
                0.0
            } else {
                v
            }
        })
        .collect();

    let total = values.len();
    let sparsity = if total == 0 {
        0.0
    } else {
        zeroed as f64 / total as f64
    };
    tracing::debug!(
        tensor = tensor.name(),
        threshold,
        sparsity = format_args!("{:.2}%", sparsity * 100.0),
        "Pruned weights"
    );

    Pruned {
        tensor: tensor.with_values(values),
        zeroed,
        sparsity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparsity::analyze;
    use proptest::prelude::*;

    #[test]
    fn test_prune_scenario() {
        let t = Tensor::from_values("fc.weight", vec![0.01, 0.2, -0.01, 0.3]);
        let pruned = prune(t, 0.05);
        assert_eq!(pruned.tensor.values(), &[0.0, 0.2, 0.0, 0.3]);
        assert_eq!(pruned.zeroed, 2);
        assert_eq!(pruned.sparsity, 0.5);
    }

    #[test]
    fn test_zero_threshold_only_zeroes_exact_zeros() {
        let t = Tensor::from_values("t", vec![0.0, 1e-30, -1e-30, 2.0]);
        let pruned = prune(t, 0.0);
        assert_eq!(pruned.tensor.values(), &[0.0, 1e-30, -1e-30, 2.0]);
        assert_eq!(pruned.sparsity, 0.25);
    }

    #[test]
    fn test_huge_threshold_zeroes_everything() {
        let t = Tensor::new("t", vec![2, 2], vec![-5.0, 3.0, 100.0, -0.1]).unwrap();
        let pruned = prune(t, f32::MAX);
        assert!(pruned.tensor.values().iter().all(|&v| v == 0.0));
        assert_eq!(pruned.tensor.shape(), &[2, 2]);
        assert_eq!(pruned.sparsity, 1.0);
    }

    #[test]
    fn test_empty_tensor() {
        let pruned = prune(Tensor::from_values("e", vec![]), 0.5);
        assert!(pruned.tensor.is_empty());
        assert_eq!(pruned.sparsity, 0.0);
    }

    proptest! {
        #[test]
        fn prop_pruned_sparsity_matches_zero_count(
            values in prop::collection::vec(-1.0f32..1.0, 1..100),
            threshold in 0.0f32..1.0,
        ) {
            let pruned = prune(Tensor::from_values("t", values.clone()), threshold);
            let report = analyze(pruned.tensor.values());
            prop_assert_eq!(report.zeros, pruned.zeroed);
            for (orig, new) in values.iter().zip(pruned.tensor.values()) {
                if orig.abs() > threshold {
                    prop_assert_eq!(orig, new);
                } else {
                    prop_assert_eq!(*new, 0.0);
                }
            }
        }
    }
}
