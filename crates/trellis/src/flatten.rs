//! Graph flattening for atomic multi-record saves.
//!
//! A save-all request carries every record of the active subtree in flat
//! per-type buckets. Unsaved records get synthesized negative placeholder
//! identifiers so cross-references between records stay expressible before
//! the backend assigns real keys; the backend maps placeholders to real
//! identifiers on commit.

use std::sync::atomic::{AtomicI64, Ordering};

use trellis_api::SaveAllPayload;

use crate::codec::to_backend_name;
use crate::collection::Collection;
use crate::entity::{Entity, RelationSlot};

static PLACEHOLDER_COUNTER: AtomicI64 = AtomicI64::new(0);

/// Next placeholder identifier: strictly negative, unique for the life of
/// the process, never colliding with backend-assigned keys.
pub fn next_placeholder_id() -> i64 {
    PLACEHOLDER_COUNTER.fetch_sub(1, Ordering::Relaxed) - 1
}

impl Entity {
    /// Flatten this entity and its active relation subtree into the
    /// save-all wire shape. Does not mutate the entity; placeholder
    /// identifiers live only in the produced document.
    pub fn to_backend_all(&self) -> SaveAllPayload {
        self.flatten_graph(None)
    }

    pub(crate) fn flatten_graph(&self, override_id: Option<i64>) -> SaveAllPayload {
        let mut record = self.to_backend();
        let pk = to_backend_name(self.schema().primary_key);
        if let Some(id) = override_id {
            record[pk.as_str()] = serde_json::Value::from(id);
        } else if self.is_new() {
            record[pk.as_str()] = serde_json::Value::from(next_placeholder_id());
        }

        let mut document = SaveAllPayload::default();
        for (name, slot) in self.relation_slots() {
            let backend_name = to_backend_name(name);
            let nested = match slot {
                RelationSlot::One(child) => {
                    let child_id = if child.is_new() {
                        let id = next_placeholder_id();
                        record[backend_name.as_str()] = serde_json::Value::from(id);
                        Some(id)
                    } else {
                        None
                    };
                    child.flatten_graph(child_id)
                }
                RelationSlot::Many(children) => {
                    let mut ids: Vec<Option<i64>> = Vec::with_capacity(children.len());
                    let mut refs: Vec<serde_json::Value> = Vec::with_capacity(children.len());
                    for member in children.iter() {
                        if member.is_new() {
                            let id = next_placeholder_id();
                            ids.push(Some(id));
                            refs.push(serde_json::Value::from(id));
                        } else {
                            ids.push(None);
                            refs.push(member.primary_key().clone().into());
                        }
                    }
                    record[backend_name.as_str()] = serde_json::Value::Array(refs);
                    children.flatten_graph(&ids)
                }
            };
            merge_nested(&mut document, &backend_name, nested);
        }

        document.data.push(record);
        document
    }
}

impl Collection {
    pub(crate) fn flatten_graph(&self, ids: &[Option<i64>]) -> SaveAllPayload {
        let mut document = SaveAllPayload::default();
        for (index, member) in self.iter().enumerate() {
            let nested = member.flatten_graph(ids.get(index).copied().flatten());
            document.data.extend(nested.data);
            for (relation, records) in nested.relations {
                document.relations.entry(relation).or_default().extend(records);
            }
        }
        document
    }
}

/// Fold a child subtree into the parent document: the child's own records
/// land in the bucket named after the relation, its deeper buckets merge
/// by name.
fn merge_nested(document: &mut SaveAllPayload, relation: &str, nested: SaveAllPayload) {
    document
        .relations
        .entry(relation.to_string())
        .or_default()
        .extend(nested.data);
    for (name, records) in nested.relations {
        document.relations.entry(name).or_default().extend(records);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::animal_with;
    use serde_json::json;

    #[test]
    fn test_placeholders_are_negative_and_unique() {
        let a = next_placeholder_id();
        let b = next_placeholder_id();
        assert!(a < 0);
        assert!(b < a);
    }

    #[test]
    fn test_saved_graph_flattens_to_real_references() {
        let mut animal = animal_with(&["kind"]);
        animal
            .parse(&json!({"id": 1, "name": "Rex", "kind": {"id": 4, "name": "Dog"}}))
            .unwrap();

        let document = animal.to_backend_all();
        assert_eq!(document.data.len(), 1);
        assert_eq!(document.data[0]["id"], json!(1));
        assert_eq!(document.data[0]["kind"], json!(4));
        assert_eq!(document.relations["kind"].len(), 1);
        assert_eq!(document.relations["kind"][0]["id"], json!(4));
    }

    #[test]
    fn test_unsaved_nodes_get_matching_placeholders() {
        let mut animal = animal_with(&["kind"]);
        animal.set_attribute("name", "Rex".into()).unwrap();

        let document = animal.to_backend_all();
        let own_id = document.data[0]["id"].as_i64().unwrap();
        let kind_ref = document.data[0]["kind"].as_i64().unwrap();
        let kind_id = document.relations["kind"][0]["id"].as_i64().unwrap();
        assert!(own_id < 0);
        assert!(kind_ref < 0);
        assert_eq!(kind_ref, kind_id);
        assert_ne!(own_id, kind_ref);
    }

    #[test]
    fn test_plural_relation_references_align_by_position() {
        let mut animal = animal_with(&["pastOwners"]);
        animal
            .parse(&json!({
                "name": "Rex",
                "past_owners": [{"name": "Ann"}, {"id": 9, "name": "Bob"}, {"name": "Cid"}]
            }))
            .unwrap();

        let document = animal.to_backend_all();
        let refs = document.data[0]["past_owners"].as_array().unwrap();
        let bucket = &document.relations["past_owners"];
        assert_eq!(refs.len(), 3);
        assert_eq!(bucket.len(), 3);
        for (reference, record) in refs.iter().zip(bucket.iter()) {
            assert_eq!(reference, &record["id"]);
        }
        // Saved member keeps its real key, unsaved ones get placeholders.
        assert_eq!(refs[1], json!(9));
        assert!(refs[0].as_i64().unwrap() < 0);
        assert!(refs[2].as_i64().unwrap() < 0);
        assert_ne!(refs[0], refs[2]);
    }

    #[test]
    fn test_deep_chains_merge_buckets_by_name() {
        let mut animal = animal_with(&["kind.breed"]);
        animal
            .parse(&json!({
                "name": "Rex",
                "kind": {"name": "Dog", "breed": {"name": "Dachshund"}}
            }))
            .unwrap();

        let document = animal.to_backend_all();
        assert_eq!(document.data.len(), 1);
        assert_eq!(document.relations["kind"].len(), 1);
        assert_eq!(document.relations["breed"].len(), 1);
        // The kind record references the breed placeholder.
        assert_eq!(
            document.relations["kind"][0]["breed"],
            document.relations["breed"][0]["id"]
        );
    }
}
