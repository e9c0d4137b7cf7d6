//! In-memory model artifact: structure, source, settings and weights.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::ValidatedConfig;
use crate::formats::{metadata_keys, OwnerMap, FORMAT_VERSION};
use crate::quant::StoredTensor;

/// Where a model came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub framework: String,
    pub version: String,
    pub model_type: String,
    /// RFC 3339 conversion timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converted_at: Option<String>,
}

impl SourceDescriptor {
    pub fn new(
        framework: impl Into<String>,
        version: impl Into<String>,
        model_type: impl Into<String>,
    ) -> Self {
        Self {
            framework: framework.into(),
            version: version.into(),
            model_type: model_type.into(),
            converted_at: None,
        }
    }

    /// Stamp the descriptor with the current UTC time.
    pub fn stamped_now(mut self) -> Self {
        self.converted_at = Some(chrono::Utc::now().to_rfc3339());
        self
    }
}

/// Encoded tensors keyed by owner, then role.
///
/// Both levels are ordered maps: iteration (and therefore blob layout) is
/// lexicographic regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightStore {
    entries: OwnerMap<StoredTensor>,
}

impl WeightStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, returning the one it replaced.
    pub fn insert(
        &mut self,
        owner: impl Into<String>,
        role: impl Into<String>,
        tensor: StoredTensor,
    ) -> Option<StoredTensor> {
        self.entries
            .entry(owner.into())
            .or_default()
            .insert(role.into(), tensor)
    }

    pub fn get(&self, owner: &str, role: &str) -> Option<&StoredTensor> {
        self.entries.get(owner).and_then(|roles| roles.get(role))
    }

    pub fn contains_owner(&self, owner: &str) -> bool {
        self.entries.contains_key(owner)
    }

    /// Entries in serialization order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &StoredTensor)> {
        self.entries.iter().flat_map(|(owner, roles)| {
            roles
                .iter()
                .map(move |(role, t)| (owner.as_str(), role.as_str(), t))
        })
    }

    /// Number of entries across all owners
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total payload bytes (headers excluded)
    pub fn payload_bytes(&self) -> usize {
        self.iter().map(|(_, _, t)| t.payload().len()).sum()
    }
}

impl FromIterator<(String, String, StoredTensor)> for WeightStore {
    fn from_iter<I: IntoIterator<Item = (String, String, StoredTensor)>>(iter: I) -> Self {
        let mut store = Self::new();
        for (owner, role, tensor) in iter {
            store.insert(owner, role, tensor);
        }
        store
    }
}

/// Everything needed to write an artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelArtifact {
    pub format_version: String,
    pub source: SourceDescriptor,
    pub structure: serde_json::Value,
    pub quantization: ValidatedConfig,
    pub weights: WeightStore,
}

impl ModelArtifact {
    /// Length of the structure's `layers` array, 0 when absent.
    pub fn num_layers(&self) -> usize {
        self.structure
            .get(metadata_keys::LAYERS)
            .and_then(|v| v.as_array())
            .map_or(0, Vec::len)
    }
}

/// Assembles a [`ModelArtifact`].
pub struct ArtifactBuilder {
    source: SourceDescriptor,
    structure: serde_json::Value,
    quantization: ValidatedConfig,
}

impl ArtifactBuilder {
    pub fn new(source: SourceDescriptor, structure: serde_json::Value, quantization: ValidatedConfig) -> Self {
        Self {
            source,
            structure,
            quantization,
        }
    }

    /// Attach the weights and produce the artifact.
    ///
    /// Owners declared with parameters in the structure but absent from the
    /// store are logged; the build still succeeds.
    pub fn build(self, weights: WeightStore) -> ModelArtifact {
        let missing = missing_weight_owners(&self.structure, &weights);
        for owner in &missing {
            tracing::warn!(owner = %owner, "Layer declares parameters but has no weights");
        }

        ModelArtifact {
            format_version: FORMAT_VERSION.to_string(),
            source: self.source,
            structure: self.structure,
            quantization: self.quantization,
            weights,
        }
    }
}

/// Owners listed in `structure.layers` with non-empty `parameters` that have
/// no entry in the store.
pub fn missing_weight_owners(structure: &serde_json::Value, weights: &WeightStore) -> Vec<String> {
    let Some(layers) = structure.get(metadata_keys::LAYERS).and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    layers
        .iter()
        .filter(|layer| {
            layer
                .get(metadata_keys::PARAMETERS)
                .and_then(|p| p.as_object())
                .is_some_and(|p| !p.is_empty())
        })
        .filter_map(|layer| layer.get("name").and_then(|n| n.as_str()))
        .filter(|name| !weights.contains_owner(name))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quant::RawTensor;
    use serde_json::json;

    fn raw(values: &[f32]) -> StoredTensor {
        RawTensor::from_f32(vec![values.len()], values).into()
    }

    #[test]
    fn test_store_iterates_lexicographically() {
        let mut store = WeightStore::new();
        store.insert("fc2", "weight", raw(&[1.0]));
        store.insert("fc1", "weight", raw(&[2.0]));
        store.insert("fc1", "bias", raw(&[3.0]));

        let order: Vec<_> = store.iter().map(|(o, r, _)| format!("{o}.{r}")).collect();
        assert_eq!(order, vec!["fc1.bias", "fc1.weight", "fc2.weight"]);
        assert_eq!(store.len(), 3);
        assert_eq!(store.payload_bytes(), 12);
    }

    #[test]
    fn test_store_insert_replaces() {
        let mut store = WeightStore::new();
        assert!(store.insert("fc", "weight", raw(&[1.0])).is_none());
        let old = store.insert("fc", "weight", raw(&[2.0, 3.0]));
        assert!(old.is_some());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("fc", "weight").unwrap().element_count(), 2);
    }

    #[test]
    fn test_missing_weight_owners() {
        let structure = json!({
            "layers": [
                {"name": "conv", "parameters": {"weight": {"shape": [3]}}},
                {"name": "relu", "parameters": {}},
                {"name": "fc", "parameters": {"weight": {"shape": [2]}}},
                {"name": "pool"}
            ]
        });
        let mut store = WeightStore::new();
        store.insert("conv", "weight", raw(&[0.0; 3]));

        assert_eq!(missing_weight_owners(&structure, &store), vec!["fc".to_string()]);
    }

    #[test]
    fn test_missing_weight_owners_without_layers() {
        let store = WeightStore::new();
        assert!(missing_weight_owners(&json!({"name": "m"}), &store).is_empty());
        assert!(missing_weight_owners(&json!(null), &store).is_empty());
    }

    #[test]
    fn test_builder_passes_structure_through() {
        let structure = json!({"name": "tiny", "layers": [{"name": "fc", "parameters": {"weight": {}}}]});
        let source = SourceDescriptor::new("safetensors", "1", "mlp");

        let artifact = ArtifactBuilder::new(source.clone(), structure.clone(), ValidatedConfig::default())
            .build(WeightStore::new());

        assert_eq!(artifact.format_version, "1.0");
        assert_eq!(artifact.structure, structure);
        assert_eq!(artifact.source, source);
        assert_eq!(artifact.num_layers(), 1);
        assert!(artifact.weights.is_empty());
    }

    #[test]
    fn test_source_descriptor_timestamp() {
        let source = SourceDescriptor::new("safetensors", "1", "unknown").stamped_now();
        let stamp = source.converted_at.unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&stamp).is_ok());
    }
}
