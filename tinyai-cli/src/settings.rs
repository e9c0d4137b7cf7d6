//! Conversion settings layering: defaults < config file < environment < flags.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tinyai_storage::{Int8Overflow, QuantizationConfig};

use crate::common::load_config;

/// Environment variable names
pub mod env_keys {
    pub const QUANTIZE_BITS: &str = "TINYAI_QUANTIZE_BITS";
    pub const MIXED_PRECISION: &str = "TINYAI_MIXED_PRECISION";
    pub const PRUNE_THRESHOLD: &str = "TINYAI_PRUNE_THRESHOLD";
    pub const WEIGHT_CLUSTERING: &str = "TINYAI_WEIGHT_CLUSTERING";
    pub const OPTIMIZE: &str = "TINYAI_OPTIMIZE";
    pub const INT8_OVERFLOW: &str = "TINYAI_INT8_OVERFLOW";
    pub const CLUSTER_SEED: &str = "TINYAI_CLUSTER_SEED";
}

/// Optional values that replace configured ones when present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub quantize_bits: Option<u32>,
    pub mixed_precision: Option<bool>,
    pub prune_threshold: Option<f32>,
    pub weight_clustering: Option<i64>,
    pub optimize: Option<bool>,
    pub int8_overflow: Option<Int8Overflow>,
    pub cluster_seed: Option<u64>,
}

impl Overrides {
    /// Read overrides through `lookup` (normally `std::env::var`).
    ///
    /// Values that do not parse are ignored with a warning.
    pub fn from_env<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            quantize_bits: env_value(&lookup, env_keys::QUANTIZE_BITS, str::parse),
            mixed_precision: env_value(&lookup, env_keys::MIXED_PRECISION, parse_bool),
            prune_threshold: env_value(&lookup, env_keys::PRUNE_THRESHOLD, str::parse),
            weight_clustering: env_value(&lookup, env_keys::WEIGHT_CLUSTERING, str::parse),
            optimize: env_value(&lookup, env_keys::OPTIMIZE, parse_bool),
            int8_overflow: env_value(&lookup, env_keys::INT8_OVERFLOW, parse_overflow),
            cluster_seed: env_value(&lookup, env_keys::CLUSTER_SEED, str::parse),
        }
    }

    pub fn from_process_env() -> Self {
        Self::from_env(|key| std::env::var(key).ok())
    }

    pub fn apply(&self, config: &mut QuantizationConfig) {
        if let Some(v) = self.quantize_bits {
            config.quantize_bits = v;
        }
        if let Some(v) = self.mixed_precision {
            config.mixed_precision = v;
        }
        if let Some(v) = self.prune_threshold {
            config.prune_threshold = Some(v);
        }
        if let Some(v) = self.weight_clustering {
            config.weight_clustering = Some(v);
        }
        if let Some(v) = self.optimize {
            config.optimize = v;
        }
        if let Some(v) = self.int8_overflow {
            config.int8_overflow = v;
        }
        if let Some(v) = self.cluster_seed {
            config.cluster_seed = v;
        }
    }
}

fn env_value<T, E, L, P>(lookup: &L, key: &str, parse: P) -> Option<T>
where
    L: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Result<T, E>,
{
    let raw = lookup(key)?;
    match parse(raw.trim()) {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(variable = key, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

/// Accepts true/1/yes and false/0/no, case-insensitively.
pub fn parse_bool(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(format!("not a boolean: {other}")),
    }
}

pub fn parse_overflow(s: &str) -> Result<Int8Overflow, String> {
    match s.to_ascii_lowercase().as_str() {
        "wrap" => Ok(Int8Overflow::Wrap),
        "saturate" => Ok(Int8Overflow::Saturate),
        other => Err(format!("expected wrap or saturate, got {other}")),
    }
}

/// Resolve the effective configuration.
pub fn resolve(
    config_file: Option<&Path>,
    env: &Overrides,
    flags: &Overrides,
) -> Result<QuantizationConfig> {
    let mut config = match config_file {
        Some(path) => load_config(path)?,
        None => QuantizationConfig::default(),
    };
    env.apply(&mut config);
    flags.apply(&mut config);
    Ok(config)
}

/// Write a template config with every default spelled out.
pub fn generate_config_template(output: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&QuantizationConfig::default())?;
    fs::write(output, json + "\n")
        .with_context(|| format!("Failed to write config: {}", output.display()))?;

    println!("=== Generated {} ===", output.display());
    println!("\nEdit the config, then run:");
    println!("  tinyai convert --model <model.safetensors> --config {}", output.display());
    Ok(())
}
