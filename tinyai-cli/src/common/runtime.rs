//! Runtime utilities: worker pool sizing and progress display.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};

/// Thread-safe progress counter for parallel tensor work.
pub struct ProgressTracker {
    processed: AtomicUsize,
    total: usize,
    label: String,
    quiet: bool,
}

impl ProgressTracker {
    pub fn new(total: usize, label: impl Into<String>) -> Self {
        Self {
            processed: AtomicUsize::new(0),
            total,
            label: label.into(),
            quiet: false,
        }
    }

    /// Count silently, e.g. when stderr is taken by debug logging.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Record one finished item, redrawing every `n` items and at the end.
    pub fn increment_every(&self, n: usize) -> usize {
        let current = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.quiet && (current % n.max(1) == 0 || current == self.total) {
            eprint!("\r{}: {}/{}", self.label, current, self.total);
            let _ = std::io::stderr().flush();
        }
        current
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    /// Terminate the progress line.
    pub fn finish(&self) {
        if !self.quiet && self.total > 0 {
            eprintln!();
        }
        tracing::debug!(label = %self.label, processed = self.processed(), total = self.total, "Progress finished");
    }
}

/// Get number of available CPU cores, falling back to 4 if detection fails.
pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Build the rayon pool used for per-tensor work.
pub fn build_thread_pool(threads: Option<usize>) -> Result<rayon::ThreadPool> {
    let threads = threads.filter(|&n| n > 0).unwrap_or_else(num_cpus);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .with_context(|| format!("Failed to start {threads} worker threads"))
}
