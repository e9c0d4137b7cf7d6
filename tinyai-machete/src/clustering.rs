//! Weight clustering (weight sharing).
//!
//! Values are grouped with 1-D k-means and each value is replaced by the
//! centroid of its group, so a tensor holds at most `k` distinct values.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tinyai_storage::{Result, StorageError, Tensor};

/// Deterministic centroid fitting for a set of scalar values.
///
/// Implementations must return the same centroids for the same input.
pub trait Clusterer: Send + Sync {
    /// Fit `k` centroids to `values`. Called only when `values` holds more
    /// than `k` distinct values and `k > 0`.
    fn fit(&self, values: &[f32], k: usize) -> Vec<f32>;
}

/// k-means++ seeding followed by Lloyd iterations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LloydKMeans {
    pub seed: u64,
    pub max_iter: usize,
    /// Stop once the summed centroid movement drops to this value
    pub tol: f64,
}

impl Default for LloydKMeans {
    fn default() -> Self {
        Self {
            seed: 0,
            max_iter: 300,
            tol: 1e-4,
        }
    }
}

impl LloydKMeans {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    fn seed_centroids(&self, values: &[f32], k: usize) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut centroids = Vec::with_capacity(k);
        centroids.push(values[rng.gen_range(0..values.len())] as f64);

        // Squared distance from each value to its nearest chosen centroid
        let mut nearest: Vec<f64> = values
            .iter()
            .map(|&v| (v as f64 - centroids[0]).powi(2))
            .collect();

        while centroids.len() < k {
            let total: f64 = nearest.iter().sum();
            let next = if total > 0.0 && total.is_finite() {
                let mut target = rng.gen::<f64>() * total;
                let mut pick = values.len() - 1;
                for (i, &d) in nearest.iter().enumerate() {
                    target -= d;
                    if target <= 0.0 && d > 0.0 {
                        pick = i;
                        break;
                    }
                }
                pick
            } else {
                rng.gen_range(0..values.len())
            };

            let c = values[next] as f64;
            centroids.push(c);
            for (d, &v) in nearest.iter_mut().zip(values) {
                *d = d.min((v as f64 - c).powi(2));
            }
        }

        centroids
    }
}

impl Clusterer for LloydKMeans {
    fn fit(&self, values: &[f32], k: usize) -> Vec<f32> {
        let mut centroids = self.seed_centroids(values, k);
        let mut sums = vec![0.0f64; k];
        let mut counts = vec![0usize; k];

        for iter in 0..self.max_iter {
            centroids.sort_by(f64::total_cmp);
            sums.iter_mut().for_each(|s| *s = 0.0);
            counts.iter_mut().for_each(|c| *c = 0);

            for &v in values {
                let i = nearest_index(&centroids, v as f64);
                sums[i] += v as f64;
                counts[i] += 1;
            }

            let mut shift = 0.0;
            for ((c, &sum), &count) in centroids.iter_mut().zip(&sums).zip(&counts) {
                // Empty clusters keep their previous centroid
                if count > 0 {
                    let updated = sum / count as f64;
                    shift += (updated - *c).abs();
                    *c = updated;
                }
            }

            if shift <= self.tol {
                tracing::trace!(iterations = iter + 1, "k-means converged");
                break;
            }
        }

        centroids.sort_by(f64::total_cmp);
        centroids.into_iter().map(|c| c as f32).collect()
    }
}

/// Index of the closest centroid; `centroids` must be sorted.
fn nearest_index(centroids: &[f64], v: f64) -> usize {
    let i = centroids.partition_point(|&c| c < v);
    if i == 0 {
        0
    } else if i == centroids.len() {
        i - 1
    } else if (v - centroids[i - 1]) <= (centroids[i] - v) {
        i - 1
    } else {
        i
    }
}

/// Number of distinct values, counting `-0.0` and `0.0` as one.
pub fn distinct_count(values: &[f32]) -> usize {
    values
        .iter()
        .map(|&v| if v == 0.0 { 0.0f32.to_bits() } else { v.to_bits() })
        .collect::<HashSet<_>>()
        .len()
}

/// A clustered tensor and the centroids used, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Clustered {
    pub tensor: Tensor,
    /// None when the tensor already had at most `k` distinct values
    pub centroids: Option<Vec<f32>>,
}

/// Replace each value by its cluster centroid.
///
/// Tensors with at most `k` distinct values are returned unchanged.
pub fn cluster(tensor: Tensor, k: usize, clusterer: &dyn Clusterer) -> Result<Clustered> {
    if k == 0 {
        return Err(StorageError::InvalidClusterCount(0));
    }

    let distinct = distinct_count(tensor.values());
    if distinct <= k {
        return Ok(Clustered {
            tensor,
            centroids: None,
        });
    }

    let mut centroids = clusterer.fit(tensor.values(), k);
    centroids.sort_by(f32::total_cmp);
    let sorted: Vec<f64> = centroids.iter().map(|&c| c as f64).collect();
    let values: Vec<f32> = tensor
        .values()
        .iter()
        .map(|&v| centroids[nearest_index(&sorted, v as f64)])
        .collect();

    tracing::debug!(
        tensor = tensor.name(),
        clusters = k,
        distinct_before = distinct,
        "Applied weight clustering"
    );

    Ok(Clustered {
        tensor: tensor.with_values(values),
        centroids: Some(centroids),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tensor(values: Vec<f32>) -> Tensor {
        Tensor::from_values("t", values)
    }

    #[test]
    fn test_zero_clusters_is_an_error() {
        let err = cluster(tensor(vec![1.0]), 0, &LloydKMeans::default()).unwrap_err();
        assert!(matches!(err, StorageError::InvalidClusterCount(0)));
    }

    #[test]
    fn test_few_distinct_values_are_unchanged() {
        let values = vec![1.0, 2.0, 1.0, 2.0, 0.0, -0.0];
        let clustered = cluster(tensor(values.clone()), 3, &LloydKMeans::default()).unwrap();
        assert!(clustered.centroids.is_none());
        assert_eq!(clustered.tensor.values(), values.as_slice());
    }

    #[test]
    fn test_distinct_count_merges_signed_zero() {
        assert_eq!(distinct_count(&[0.0, -0.0, 1.0, 1.0]), 2);
        assert_eq!(distinct_count(&[]), 0);
    }

    #[test]
    fn test_two_well_separated_groups() {
        let values = vec![0.0, 0.1, 0.2, 10.0, 10.1, 10.2];
        let clustered = cluster(tensor(values), 2, &LloydKMeans::default()).unwrap();

        let centroids = clustered.centroids.unwrap();
        assert_eq!(centroids.len(), 2);
        assert!((centroids[0] - 0.1).abs() < 1e-5);
        assert!((centroids[1] - 10.1).abs() < 1e-4);

        let out = clustered.tensor.values();
        assert_eq!(out[0], out[2]);
        assert_eq!(out[3], out[5]);
        assert_eq!(distinct_count(out), 2);
    }

    #[test]
    fn test_same_seed_same_output() {
        let values: Vec<f32> = (0..200).map(|i| ((i * 37) % 101) as f32 / 7.0).collect();
        let a = cluster(tensor(values.clone()), 5, &LloydKMeans::with_seed(7)).unwrap();
        let b = cluster(tensor(values), 5, &LloydKMeans::with_seed(7)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_shape_is_preserved() {
        let t = Tensor::new("w", vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let clustered = cluster(t, 2, &LloydKMeans::default()).unwrap();
        assert_eq!(clustered.tensor.shape(), &[2, 3]);
    }

    #[test]
    fn test_nearest_index() {
        let c = [0.0, 1.0, 5.0];
        assert_eq!(nearest_index(&c, -3.0), 0);
        assert_eq!(nearest_index(&c, 0.4), 0);
        assert_eq!(nearest_index(&c, 0.6), 1);
        assert_eq!(nearest_index(&c, 2.9), 1);
        assert_eq!(nearest_index(&c, 9.0), 2);
    }

    /// Returns its centroids unsorted
    struct Fixed(Vec<f32>);

    impl Clusterer for Fixed {
        fn fit(&self, _values: &[f32], _k: usize) -> Vec<f32> {
            self.0.clone()
        }
    }

    #[test]
    fn test_custom_clusterer() {
        let clustered = cluster(tensor(vec![0.1, 0.9, 2.2]), 2, &Fixed(vec![2.0, 0.0])).unwrap();
        assert_eq!(clustered.tensor.values(), &[0.0, 0.0, 2.0]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_at_most_k_distinct_values(
            values in prop::collection::vec(-100.0f32..100.0, 1..200),
            k in 1usize..8,
        ) {
            let clustered = cluster(tensor(values.clone()), k, &LloydKMeans::default()).unwrap();
            prop_assert_eq!(clustered.tensor.len(), values.len());
            prop_assert!(distinct_count(clustered.tensor.values()) <= k);
        }

        #[test]
        fn prop_identity_when_k_covers_distinct_values(
            values in prop::collection::vec(-3i32..3, 0..50),
        ) {
            let values: Vec<f32> = values.into_iter().map(|v| v as f32).collect();
            let k = distinct_count(&values).max(1);
            let clustered = cluster(tensor(values.clone()), k, &LloydKMeans::default()).unwrap();
            prop_assert_eq!(clustered.tensor.values(), values.as_slice());
        }
    }
}
