//! Wire shapes exchanged with the backend.
//!
//! The backend flattens nested graphs: a response carries the primary
//! record(s) in `data`, auxiliary flat record lists in `repos`, and a
//! mapping from relation paths to repository names in `relMapping`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::sync::Arc;

use crate::value::Value;

/// A flat, immutable list of backend records used to resolve a relation
/// when only an identifier is present. Shared by reference between all the
/// relation targets it was attached to; never mutated by consumers.
#[derive(Debug, Clone, Default)]
pub struct Repository(Arc<Vec<serde_json::Value>>);

impl Repository {
    pub fn new(records: Vec<serde_json::Value>) -> Self {
        Repository(Arc::new(records))
    }

    pub fn records(&self) -> &[serde_json::Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Find the first record whose `field` loosely matches `id`.
    pub fn find_by(&self, field: &str, id: &Value) -> Option<&serde_json::Value> {
        self.0.iter().find(|record| {
            record
                .get(field)
                .map_or(false, |raw| Value::from(raw.clone()).loose_eq(id))
        })
    }
}

impl From<Vec<serde_json::Value>> for Repository {
    fn from(records: Vec<serde_json::Value>) -> Self {
        Repository::new(records)
    }
}

impl Serialize for Repository {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Repository {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Repository::new(Vec::deserialize(deserializer)?))
    }
}

/// A flattened backend response for a single entity or a page of records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendPayload {
    /// Flat record (object) or records (array) for the primary resource.
    pub data: serde_json::Value,

    /// Auxiliary flat record lists, keyed by repository name.
    #[serde(default)]
    pub repos: HashMap<String, Repository>,

    /// Relation path (backend casing, possibly dotted) to repository name.
    #[serde(default, rename = "relMapping")]
    pub rel_mapping: HashMap<String, String>,
}

impl BackendPayload {
    pub fn from_data(data: serde_json::Value) -> Self {
        BackendPayload {
            data,
            ..Default::default()
        }
    }
}

/// A flattened backend response for a collection fetch, carrying the
/// authoritative total for pagination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionPayload {
    #[serde(flatten)]
    pub payload: BackendPayload,

    #[serde(default, alias = "totalRecords")]
    pub total_records: Option<u64>,
}

/// Outbound shape for an atomic multi-record save: the flattened primary
/// record(s) plus, per backend-cased relation name, the flattened related
/// records. Cross-references between unsaved records use synthesized
/// negative placeholder identifiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveAllPayload {
    pub data: Vec<serde_json::Value>,

    #[serde(default)]
    pub relations: HashMap<String, Vec<serde_json::Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_deserializes_wire_shape() {
        let payload: BackendPayload = serde_json::from_value(json!({
            "data": {"id": 1, "kind": 7},
            "repos": {"animal_kind": [{"id": 7, "name": "Dog"}]},
            "relMapping": {"kind": "animal_kind"}
        }))
        .unwrap();

        assert_eq!(payload.data["id"], json!(1));
        assert_eq!(payload.repos["animal_kind"].len(), 1);
        assert_eq!(payload.rel_mapping["kind"], "animal_kind");
    }

    #[test]
    fn test_repos_and_mapping_default_to_empty() {
        let payload: BackendPayload =
            serde_json::from_value(json!({"data": {"id": 1}})).unwrap();
        assert!(payload.repos.is_empty());
        assert!(payload.rel_mapping.is_empty());
    }

    #[test]
    fn test_collection_payload_total() {
        let payload: CollectionPayload = serde_json::from_value(json!({
            "data": [{"id": 1}],
            "total_records": 50
        }))
        .unwrap();
        assert_eq!(payload.total_records, Some(50));
        assert!(payload.payload.data.is_array());
    }

    #[test]
    fn test_repository_loose_lookup() {
        let repo = Repository::new(vec![json!({"id": 7, "name": "Dog"})]);
        assert!(repo.find_by("id", &Value::Integer(7)).is_some());
        assert!(repo.find_by("id", &Value::String("7".into())).is_some());
        assert!(repo.find_by("id", &Value::Integer(8)).is_none());
    }
}
