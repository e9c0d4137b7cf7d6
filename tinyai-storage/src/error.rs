//! Error types for weight storage, quantization and artifact I/O.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the storage crate.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid quantization bit width: {0} (expected 4, 8, 16 or 32)")]
    InvalidBitWidth(u32),

    #[error("Invalid weight clustering count: {0} (must be a positive integer)")]
    InvalidClusterCount(i64),

    #[error("Invalid prune threshold: {0} (must be finite and non-negative)")]
    InvalidPruneThreshold(f32),

    #[error("Tensor {name}: shape implies {expected} elements, got {actual}")]
    ShapeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Tensor {owner}.{role}: dimension {dim} does not fit a 32-bit shape header")]
    DimensionOverflow {
        owner: String,
        role: String,
        dim: usize,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Metadata JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed artifact: {0}")]
    Format(String),

    #[error("No weight entry for {owner}.{role}")]
    MissingEntry { owner: String, role: String },
}

impl StorageError {
    /// Attach a path to an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors that reject the run configuration before any tensor work.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidBitWidth(_) | Self::InvalidClusterCount(_) | Self::InvalidPruneThreshold(_)
        )
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
