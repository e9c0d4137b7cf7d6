//! tinyai-machete - Pruning, sparsity and weight clustering for TinyAI.
//!
//! Lossy size reductions applied to f32 tensors before quantization:
//! - Magnitude pruning (zero everything at or below a threshold)
//! - Sparsity analysis
//! - Weight clustering (1-D k-means weight sharing)
//!
//! None of these transformations are reversible.

pub mod clustering;
pub mod pruning;
pub mod sparsity;

pub use clustering::{cluster, distinct_count, Clustered, Clusterer, LloydKMeans};
pub use pruning::{prune, Pruned};
pub use sparsity::{analyze, SparsityReport};
