//! Sparsity analysis.

/// Zero counts for a tensor or a group of tensors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SparsityReport {
    pub total: usize,
    pub zeros: usize,
}

impl SparsityReport {
    /// Fraction of zero elements; 0 for an empty tensor.
    pub fn sparsity(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.zeros as f64 / self.total as f64
        }
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            total: self.total + other.total,
            zeros: self.zeros + other.zeros,
        }
    }
}

/// Count exact zeros (either sign).
pub fn analyze(values: &[f32]) -> SparsityReport {
    SparsityReport {
        total: values.len(),
        zeros: values.iter().filter(|&&v| v == 0.0).count(),
    }
}
