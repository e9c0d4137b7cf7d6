//! Common utilities shared between the convert and inspect commands.

pub mod runtime;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

const SHARD_EXTENSION: &str = "safetensors";

fn is_shard(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(SHARD_EXTENSION))
}

/// Model shards to convert, in name order.
///
/// `path` is either a single `.safetensors` file or a directory whose
/// `.safetensors` entries are the shards of one model. Hidden files (editor
/// swap files, `._` resource forks) are ignored.
pub fn find_model_shards(path: &Path) -> Result<Vec<PathBuf>> {
    let meta = fs::metadata(path)
        .with_context(|| format!("Model path not found: {}", path.display()))?;

    if meta.is_file() {
        anyhow::ensure!(is_shard(path), "Not a SafeTensors model file: {}", path.display());
        return Ok(vec![path.to_path_buf()]);
    }

    let mut shards = Vec::new();
    for entry in fs::read_dir(path)
        .with_context(|| format!("Failed to list model directory: {}", path.display()))?
    {
        let shard = entry?.path();
        let hidden = shard
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if shard.is_file() && !hidden && is_shard(&shard) {
            shards.push(shard);
        }
    }

    anyhow::ensure!(
        !shards.is_empty(),
        "Model directory has no .safetensors shards: {}",
        path.display()
    );
    shards.sort();
    Ok(shards)
}

/// Load a JSON config file.
pub fn load_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;

    serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse config: {}", path.display()))
}

/// Convert raw little-endian bytes to f32 based on dtype.
pub fn bytes_to_f32(data: &[u8], dtype: safetensors::Dtype, count: usize) -> Result<Vec<f32>> {
    use safetensors::Dtype;

    match dtype {
        Dtype::F32 => {
            check_len("F32", data, count, 4)?;
            Ok(data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect())
        }
        Dtype::F16 => {
            check_len("F16", data, count, 2)?;
            Ok(data
                .chunks_exact(2)
                .map(|c| half::f16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect())
        }
        Dtype::BF16 => {
            check_len("BF16", data, count, 2)?;
            Ok(data
                .chunks_exact(2)
                .map(|c| half::bf16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect())
        }
        _ => anyhow::bail!("Unsupported dtype: {:?}. Only F32, F16, BF16 supported.", dtype),
    }
}

/// Whether [`bytes_to_f32`] can decode a dtype.
pub fn is_float_dtype(dtype: safetensors::Dtype) -> bool {
    use safetensors::Dtype;
    matches!(dtype, Dtype::F32 | Dtype::F16 | Dtype::BF16)
}

fn check_len(label: &str, data: &[u8], count: usize, width: usize) -> Result<()> {
    if data.len() != count * width {
        anyhow::bail!(
            "{} size mismatch: expected {} bytes, got {}",
            label,
            count * width,
            data.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // ==================== find_model_shards tests ====================

    #[test]
    fn test_single_shard_file() {
        let dir = TempDir::new().unwrap();
        let shard = dir.path().join("tiny.safetensors");
        fs::File::create(&shard).unwrap();

        assert_eq!(find_model_shards(&shard).unwrap(), vec![shard]);
    }

    #[test]
    fn test_pytorch_checkpoint_is_not_a_shard() {
        let dir = TempDir::new().unwrap();
        let checkpoint = dir.path().join("model.pt");
        fs::File::create(&checkpoint).unwrap();

        let err = find_model_shards(&checkpoint).unwrap_err();
        assert!(err.to_string().contains("Not a SafeTensors model file"));
    }

    #[test]
    fn test_sharded_model_directory() {
        let dir = TempDir::new().unwrap();
        for name in [
            "model-00002-of-00002.safetensors",
            "model-00001-of-00002.SAFETENSORS",
            ".model-00001-of-00002.safetensors",
            "config.json",
        ] {
            fs::File::create(dir.path().join(name)).unwrap();
        }

        let shards = find_model_shards(dir.path()).unwrap();
        let names: Vec<_> = shards
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["model-00001-of-00002.SAFETENSORS", "model-00002-of-00002.safetensors"]
        );
    }

    #[test]
    fn test_directory_without_shards() {
        let dir = TempDir::new().unwrap();
        fs::File::create(dir.path().join("tokenizer.json")).unwrap();

        let err = find_model_shards(dir.path()).unwrap_err();
        assert!(err.to_string().contains("has no .safetensors shards"));
    }

    #[test]
    fn test_missing_model_path() {
        let dir = TempDir::new().unwrap();
        let err = find_model_shards(&dir.path().join("gone")).unwrap_err();
        assert!(err.to_string().contains("Model path not found"));
    }

    // ==================== load_config tests ====================

    #[test]
    fn test_load_config_success() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("convert_config.json");
        fs::write(&config_path, r#"{"quantize_bits": 8, "mixed_precision": true}"#).unwrap();

        let config: tinyai_storage::QuantizationConfig = load_config(&config_path).unwrap();
        assert_eq!(config.quantize_bits, 8);
        assert!(config.mixed_precision);
    }

    #[test]
    fn test_load_config_missing_file() {
        let result: Result<tinyai_storage::QuantizationConfig> =
            load_config(Path::new("/nonexistent/config.json"));
        assert!(result.unwrap_err().to_string().contains("Failed to read config"));
    }

    #[test]
    fn test_load_config_invalid_json() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("bad.json");
        fs::write(&config_path, "not json").unwrap();

        let result: Result<tinyai_storage::QuantizationConfig> = load_config(&config_path);
        assert!(result.unwrap_err().to_string().contains("Failed to parse config"));
    }

    // ==================== bytes_to_f32 tests ====================

    #[test]
    fn test_bytes_to_f32_f32() {
        use safetensors::Dtype;

        let values: Vec<f32> = vec![1.0, 2.0, 3.0, 4.0];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();

        assert_eq!(bytes_to_f32(&bytes, Dtype::F32, 4).unwrap(), values);
    }

    #[test]
    fn test_bytes_to_f32_size_mismatch() {
        use safetensors::Dtype;

        let bytes = vec![0u8; 12];
        let result = bytes_to_f32(&bytes, Dtype::F32, 4);
        assert!(result.unwrap_err().to_string().contains("size mismatch"));

        let result = bytes_to_f32(&[0u8; 4], Dtype::F16, 3);
        assert!(result.unwrap_err().to_string().contains("size mismatch"));
    }

    #[test]
    fn test_bytes_to_f32_half_types() {
        use safetensors::Dtype;

        let f16_bytes: Vec<u8> = [1.0f32, 2.0]
            .iter()
            .flat_map(|&v| half::f16::from_f32(v).to_le_bytes())
            .collect();
        assert_eq!(bytes_to_f32(&f16_bytes, Dtype::F16, 2).unwrap(), vec![1.0, 2.0]);

        let bf16_bytes: Vec<u8> = [1.5f32, 3.0]
            .iter()
            .flat_map(|&v| half::bf16::from_f32(v).to_le_bytes())
            .collect();
        assert_eq!(bytes_to_f32(&bf16_bytes, Dtype::BF16, 2).unwrap(), vec![1.5, 3.0]);
    }

    #[test]
    fn test_bytes_to_f32_unsupported_dtype() {
        use safetensors::Dtype;

        let result = bytes_to_f32(&[0u8; 8], Dtype::I64, 1);
        assert!(result.unwrap_err().to_string().contains("Unsupported dtype"));
        assert!(!is_float_dtype(Dtype::I64));
        assert!(is_float_dtype(Dtype::BF16));
    }
}
