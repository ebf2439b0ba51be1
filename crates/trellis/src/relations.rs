//! Relation descriptor parsing and repository propagation.
//!
//! A relation declaration is a flat list of dotted paths ("kind",
//! "kind.breed", "pastOwners"). Parsing groups the paths by head segment,
//! merging nested continuations, and materializes an entity or collection
//! per immediate relation from the schema table.
//!
//! Repository propagation walks a payload's `relMapping` through the
//! already-materialized relation tree and attaches every repository before
//! any record is parsed, so relation-by-identifier resolution never races
//! ahead of repository availability.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;
use trellis_api::{Error, Repository};

use crate::codec::to_internal_name;
use crate::collection::{Collection, CollectionOptions};
use crate::entity::{Entity, EntityOptions, RelationSlot};
use crate::schema::{EntitySchema, RelationKind};
use crate::transport::Transport;

/// Group dotted relation paths by their first segment, preserving the
/// order in which heads first appear. Two paths naming the same head merge
/// their nested continuations.
pub(crate) fn group_relation_paths(paths: &[String]) -> Vec<(String, Vec<String>)> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for path in paths {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path.as_str(), None),
        };
        let index = match groups.iter().position(|(name, _)| name == head) {
            Some(index) => index,
            None => {
                groups.push((head.to_string(), Vec::new()));
                groups.len() - 1
            }
        };
        if let Some(rest) = rest {
            groups[index].1.push(rest.to_string());
        }
    }
    groups
}

/// Materialize the immediate relations of `schema` for the given active
/// paths. `nested_repositories` seeds singular relation targets with
/// repositories that arrived before this entity existed (payloads for
/// collections deliver them ahead of member construction).
pub(crate) fn materialize(
    schema: &'static EntitySchema,
    paths: &[String],
    nested_repositories: &HashMap<String, Repository>,
    transport: Option<&Arc<dyn Transport>>,
) -> Result<BTreeMap<&'static str, RelationSlot>, Error> {
    let mut slots = BTreeMap::new();
    for (head, nested) in group_relation_paths(paths) {
        let def = schema.relation(&head).ok_or_else(|| Error::UnknownRelation {
            entity: schema.name.to_string(),
            name: head.clone(),
        })?;
        let slot = match def.kind {
            RelationKind::Many => {
                let collection = Collection::with_options(
                    def.target(),
                    CollectionOptions {
                        relations: nested,
                        transport: transport.cloned(),
                        ..Default::default()
                    },
                )?;
                RelationSlot::Many(Box::new(collection))
            }
            RelationKind::One => {
                let entity = Entity::with_options(
                    def.target(),
                    EntityOptions {
                        relations: nested,
                        repository: nested_repositories.get(def.name).cloned(),
                        transport: transport.cloned(),
                        ..Default::default()
                    },
                )?;
                RelationSlot::One(Box::new(entity))
            }
        };
        slots.insert(def.name, slot);
    }
    Ok(slots)
}

/// Attach every repository named by `rel_mapping` to its relation target.
/// Must complete before parsing the payload's `data`. Mapping entries for
/// relations not active on this instance are skipped, matching the parse
/// tolerance for unknown payload keys.
pub(crate) fn attach_repositories(
    entity: &mut Entity,
    repos: &HashMap<String, Repository>,
    rel_mapping: &HashMap<String, String>,
) -> Result<(), Error> {
    // Deterministic attachment order regardless of map iteration order.
    let mut mapping: Vec<(&String, &String)> = rel_mapping.iter().collect();
    mapping.sort();

    for (path, repo_name) in mapping {
        let repository = repos.get(repo_name).cloned().unwrap_or_default();
        let segments: Vec<String> = path.split('.').map(to_internal_name).collect();
        attach_at_path(entity, path, &segments, repository)?;
    }
    Ok(())
}

fn attach_at_path(
    entity: &mut Entity,
    full_path: &str,
    segments: &[String],
    repository: Repository,
) -> Result<(), Error> {
    let Some((head, rest)) = segments.split_first() else {
        return Ok(());
    };
    let entity_name = entity.schema().name;
    match entity.relation_slot_mut(head) {
        None => {
            debug!(
                entity = entity_name,
                path = full_path,
                "ignoring repository mapping for inactive relation"
            );
            Ok(())
        }
        Some(RelationSlot::One(child)) => {
            if rest.is_empty() {
                child.set_repository(repository);
                Ok(())
            } else {
                attach_at_path(child, full_path, rest, repository)
            }
        }
        Some(RelationSlot::Many(collection)) => match rest {
            [] => {
                collection.set_repository(repository);
                Ok(())
            }
            // Members do not exist yet; park the repository on the
            // collection so each member seeds itself at construction.
            [leaf] => {
                collection.register_nested_repository(leaf, repository);
                Ok(())
            }
            _ => Err(Error::UnsupportedRelationChain {
                path: full_path.to_string(),
            }),
        },
    }
}
