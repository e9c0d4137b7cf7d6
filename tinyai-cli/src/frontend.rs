//! SafeTensors front end: files -> extracted tensors + model structure.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::prelude::*;
use safetensors::SafeTensors;
use serde_json::{json, Map, Value};
use tinyai_storage::{ExtractedTensor, SourceDescriptor, Tensor};

use crate::common::{bytes_to_f32, find_model_shards, is_float_dtype};

/// Framework name recorded in the source descriptor.
pub const FRAMEWORK: &str = "safetensors";

/// SafeTensors container format version.
pub const FORMAT_VERSION: &str = "1";

/// A tensor that could not be decoded to f32.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedTensor {
    pub name: String,
    pub dtype: String,
}

/// Everything the conversion core needs from a model.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    /// Sorted by owner, then role
    pub tensors: Vec<ExtractedTensor>,
    pub structure: Value,
    pub source: SourceDescriptor,
    pub skipped: Vec<SkippedTensor>,
    pub files: Vec<PathBuf>,
}

struct FileContents {
    tensors: Vec<(ExtractedTensor, String)>,
    skipped: Vec<SkippedTensor>,
    header: HashMap<String, String>,
}

/// Load one `.safetensors` file or every such file in a directory.
pub fn load_safetensors(path: &Path) -> Result<LoadedModel> {
    let files = find_model_shards(path)?;
    println!("Found {} safetensors file(s)", files.len());

    let contents = files
        .par_iter()
        .map(|file| read_file(file))
        .collect::<Result<Vec<_>>>()?;

    let mut tensors = Vec::new();
    let mut dtypes = HashMap::new();
    let mut skipped = Vec::new();
    let mut header = BTreeMap::new();
    for file in contents {
        for (t, dtype) in file.tensors {
            dtypes.insert((t.owner.clone(), t.role.clone()), dtype);
            tensors.push(t);
        }
        skipped.extend(file.skipped);
        header.extend(file.header);
    }
    tensors.sort_by(|a, b| (&a.owner, &a.role).cmp(&(&b.owner, &b.role)));

    for s in &skipped {
        tracing::warn!(tensor = %s.name, dtype = %s.dtype, "Skipping tensor with non-float dtype");
    }

    let model_type = header
        .get("model_type")
        .or_else(|| header.get("architecture"))
        .cloned()
        .unwrap_or_else(|| "unknown".to_string());
    let name = header.get("name").cloned().unwrap_or_else(|| model_name(path));

    let structure = build_structure(&name, &tensors, &dtypes, &header);
    let source = SourceDescriptor::new(FRAMEWORK, FORMAT_VERSION, model_type);

    Ok(LoadedModel {
        tensors,
        structure,
        source,
        skipped,
        files,
    })
}

fn read_file(path: &Path) -> Result<FileContents> {
    let data = fs::read(path).with_context(|| format!("Failed to read: {}", path.display()))?;
    let (_, metadata) = SafeTensors::read_metadata(&data)
        .with_context(|| format!("Failed to read metadata from: {}", path.display()))?;
    let st = SafeTensors::deserialize(&data)
        .with_context(|| format!("Failed to parse: {}", path.display()))?;

    let mut tensors = Vec::new();
    let mut skipped = Vec::new();
    for (name, view) in st.tensors() {
        let dtype = view.dtype();
        if !is_float_dtype(dtype) {
            skipped.push(SkippedTensor {
                name,
                dtype: format!("{dtype:?}"),
            });
            continue;
        }

        let shape = view.shape().to_vec();
        let count = tinyai_storage::element_count(&shape);
        let values = bytes_to_f32(view.data(), dtype, count)
            .with_context(|| format!("Failed to decode tensor: {name}"))?;
        let (owner, role) = ExtractedTensor::split_name(&name);
        let extracted = ExtractedTensor::new(owner, role, Tensor::new(name.as_str(), shape, values)?);
        tensors.push((extracted, format!("{dtype:?}")));
    }

    Ok(FileContents {
        tensors,
        skipped,
        header: metadata.metadata().clone().unwrap_or_default(),
    })
}

fn model_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("model")
        .to_string()
}

/// `{"name", "layers": [{"name", "parameters": {role: {"shape", "dtype"}}}], "config"}`
fn build_structure(
    name: &str,
    tensors: &[ExtractedTensor],
    dtypes: &HashMap<(String, String), String>,
    header: &BTreeMap<String, String>,
) -> Value {
    let mut layers: Vec<Value> = Vec::new();
    let mut current: Option<(String, Map<String, Value>)> = None;

    for t in tensors {
        let param = json!({
            "shape": t.tensor.shape(),
            "dtype": dtypes.get(&(t.owner.clone(), t.role.clone())),
        });
        match current.as_mut() {
            Some((owner, params)) if *owner == t.owner => {
                params.insert(t.role.clone(), param);
            }
            _ => {
                if let Some((owner, params)) = current.take() {
                    layers.push(json!({"name": owner, "parameters": params}));
                }
                let mut params = Map::new();
                params.insert(t.role.clone(), param);
                current = Some((t.owner.clone(), params));
            }
        }
    }
    if let Some((owner, params)) = current {
        layers.push(json!({"name": owner, "parameters": params}));
    }

    json!({
        "name": name,
        "layers": layers,
        "config": header,
    })
}
