//! Entity: one backend-managed record held in memory.
//!
//! An entity owns an attribute registry (frozen at construction from its
//! schema), the materialized relation tree for its active relation paths,
//! and the request/validation state for its network lifecycle. Parsing and
//! serialization go through the backend codec: internal camelCase names and
//! `Value` attributes on the inside, snake_case `serde_json` records on the
//! wire.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::debug;
use trellis_api::{
    change_channel, BackendPayload, ChangeReceiver, ChangeSender, Error, FieldChange, Repository,
    ValidationErrors, Value,
};

use crate::codec::{to_backend_name, to_internal_name};
use crate::collection::Collection;
use crate::lifecycle::RequestState;
use crate::relations;
use crate::schema::EntitySchema;
use crate::transport::{Query, Transport};

/// A materialized relation field: always an entity or a collection, never a
/// raw identifier. Raw identifiers only appear transiently in backend
/// payloads.
pub enum RelationSlot {
    One(Box<Entity>),
    Many(Box<Collection>),
}

/// Construction options for an entity.
#[derive(Default)]
pub struct EntityOptions {
    /// Dotted relation paths to activate on this instance.
    pub relations: Vec<String>,
    /// Repository this entity resolves from when its parent parses a bare
    /// identifier for the relation holding it.
    pub repository: Option<Repository>,
    /// Repositories for this entity's own relations that arrived before the
    /// entity existed (seeded from an owning collection).
    pub nested_repositories: HashMap<String, Repository>,
    pub transport: Option<Arc<dyn Transport>>,
    /// Resource root override; defaults to the schema's `backend_url`.
    pub url: Option<String>,
}

pub struct Entity {
    schema: &'static EntitySchema,
    /// Attribute registry, captured once at construction.
    attributes: Vec<&'static str>,
    values: HashMap<&'static str, Value>,
    originals: HashMap<&'static str, Value>,
    active_relations: Vec<String>,
    relations: BTreeMap<&'static str, RelationSlot>,
    repository: Option<Repository>,
    transport: Option<Arc<dyn Transport>>,
    url: Option<String>,
    requests: RequestState,
    validation_errors: ValidationErrors,
    changes: ChangeSender,
}

impl Entity {
    pub fn new(schema: &'static EntitySchema) -> Result<Self, Error> {
        Self::with_options(schema, EntityOptions::default())
    }

    pub fn with_options(
        schema: &'static EntitySchema,
        options: EntityOptions,
    ) -> Result<Self, Error> {
        let relations = relations::materialize(
            schema,
            &options.relations,
            &options.nested_repositories,
            options.transport.as_ref(),
        )?;
        let attributes: Vec<&'static str> = schema.attributes.to_vec();
        let values: HashMap<&'static str, Value> = attributes
            .iter()
            .map(|attr| (*attr, Value::Null))
            .collect();
        let originals = values.clone();
        Ok(Entity {
            schema,
            attributes,
            values,
            originals,
            active_relations: options.relations,
            relations,
            repository: options.repository,
            transport: options.transport,
            url: options
                .url
                .or_else(|| schema.backend_url.map(str::to_string)),
            requests: RequestState::default(),
            validation_errors: ValidationErrors::new(),
            changes: change_channel(),
        })
    }

    /// Construct and immediately parse a backend record, capturing the
    /// parsed values as the originals that [`Entity::clear`] restores.
    pub fn from_data(
        schema: &'static EntitySchema,
        data: &serde_json::Value,
        options: EntityOptions,
    ) -> Result<Self, Error> {
        let mut entity = Self::with_options(schema, options)?;
        entity.parse(data)?;
        entity.originals = entity.values.clone();
        Ok(entity)
    }

    pub fn schema(&self) -> &'static EntitySchema {
        self.schema
    }

    /// The attribute registry: every persisted data attribute, in schema
    /// declaration order. Never changes after construction.
    pub fn attributes(&self) -> &[&'static str] {
        &self.attributes
    }

    /// Full dotted relation paths active on this instance.
    pub fn active_relations(&self) -> &[String] {
        &self.active_relations
    }

    /// Immediate relation names materialized as fields on this instance.
    pub fn active_current_relations(&self) -> Vec<&'static str> {
        self.relations.keys().copied().collect()
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.values.get(attribute)
    }

    /// Write an attribute, notifying subscribers. Fails for names outside
    /// the registry.
    pub fn set_attribute(&mut self, attribute: &str, value: Value) -> Result<(), Error> {
        let attr = self
            .schema
            .attribute(attribute)
            .ok_or_else(|| Error::UnknownAttribute {
                entity: self.schema.name.to_string(),
                name: attribute.to_string(),
            })?;
        self.write_attribute(attr, value);
        Ok(())
    }

    fn write_attribute(&mut self, attribute: &'static str, value: Value) {
        self.values.insert(attribute, value.clone());
        // Fire-and-forget; nobody listening is fine.
        let _ = self.changes.send(FieldChange {
            field: attribute.to_string(),
            value,
        });
    }

    /// Observe attribute writes on this entity.
    pub fn subscribe(&self) -> ChangeReceiver {
        self.changes.subscribe()
    }

    pub fn primary_key(&self) -> &Value {
        self.values.get(self.schema.primary_key).unwrap_or(&Value::Null)
    }

    /// An entity is new until the backend has assigned it an identifier.
    pub fn is_new(&self) -> bool {
        self.primary_key().is_falsy()
    }

    pub fn relation(&self, name: &str) -> Option<&RelationSlot> {
        self.relations.get(name)
    }

    pub(crate) fn relation_slot_mut(&mut self, name: &str) -> Option<&mut RelationSlot> {
        self.relations.get_mut(name)
    }

    pub(crate) fn relation_slots(&self) -> impl Iterator<Item = (&'static str, &RelationSlot)> {
        self.relations.iter().map(|(name, slot)| (*name, slot))
    }

    /// Convenience accessor for a singular relation.
    pub fn one(&self, name: &str) -> Option<&Entity> {
        match self.relations.get(name) {
            Some(RelationSlot::One(entity)) => Some(entity),
            _ => None,
        }
    }

    /// Convenience accessor for a plural relation.
    pub fn many(&self, name: &str) -> Option<&Collection> {
        match self.relations.get(name) {
            Some(RelationSlot::Many(collection)) => Some(collection),
            _ => None,
        }
    }

    pub fn repository(&self) -> Option<&Repository> {
        self.repository.as_ref()
    }

    pub(crate) fn set_repository(&mut self, repository: Repository) {
        self.repository = Some(repository);
    }

    pub fn set_transport(&mut self, transport: Arc<dyn Transport>) {
        self.transport = Some(transport);
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = Some(url.into());
    }

    pub fn is_loading(&self) -> bool {
        self.requests.is_loading()
    }

    pub fn pending_request_count(&self) -> u32 {
        self.requests.pending()
    }

    pub fn validation_errors(&self) -> &ValidationErrors {
        &self.validation_errors
    }

    /// Restore every attribute to its original value and clear nested
    /// active relations.
    pub fn clear(&mut self) {
        let originals: Vec<(&'static str, Value)> = self
            .attributes
            .iter()
            .map(|attr| (*attr, self.originals.get(attr).cloned().unwrap_or(Value::Null)))
            .collect();
        for (attr, value) in originals {
            self.write_attribute(attr, value);
        }
        for slot in self.relations.values_mut() {
            match slot {
                RelationSlot::One(entity) => entity.clear(),
                RelationSlot::Many(collection) => collection.clear(),
            }
        }
    }

    // ===== Backend codec =====

    /// Apply a flattened backend record to this entity.
    ///
    /// Attribute keys are decoded through their cast; relation keys are
    /// dispatched by shape: nested object(s) parse inline, bare scalars
    /// resolve against the attached repository. Unknown keys are ignored.
    pub fn parse(&mut self, data: &serde_json::Value) -> Result<(), Error> {
        let schema = self.schema;
        let object = data.as_object().ok_or_else(|| {
            Error::invalid_payload(format!(
                "expected an object for `{}`, got {data}",
                schema.name
            ))
        })?;

        for (key, raw) in object {
            let field = to_internal_name(key);
            if let Some(attr) = schema.attribute(&field) {
                let value = match schema.cast(attr) {
                    Some(cast) => cast.decode(raw)?,
                    None => Value::from(raw.clone()),
                };
                self.write_attribute(attr, value);
            } else if let Some(slot) = self.relations.get_mut(field.as_str()) {
                match slot {
                    RelationSlot::One(entity) => match raw {
                        serde_json::Value::Object(_) => entity.parse(raw)?,
                        serde_json::Value::Null => entity.clear(),
                        scalar => entity.add_from_repository(scalar)?,
                    },
                    RelationSlot::Many(collection) => match raw {
                        serde_json::Value::Array(items) => {
                            if items.first().map_or(true, serde_json::Value::is_object) {
                                collection.parse(raw)?;
                            } else {
                                collection.add_from_repository(items)?;
                            }
                        }
                        serde_json::Value::Null => collection.clear(),
                        other => {
                            return Err(Error::invalid_payload(format!(
                                "expected an array for relation `{field}`, got {other}"
                            )));
                        }
                    },
                }
            } else {
                debug!(entity = schema.name, key = %key, "ignoring unknown payload key");
            }
        }
        Ok(())
    }

    /// Resolve this entity from its attached repository by identifier.
    fn add_from_repository(&mut self, id: &serde_json::Value) -> Result<(), Error> {
        let Some(repository) = self.repository.clone() else {
            debug!(
                entity = self.schema.name,
                "no repository attached, clearing relation"
            );
            self.clear();
            return Ok(());
        };
        let id = Value::from(id.clone());
        let key = to_backend_name(self.schema.primary_key);
        match repository.find_by(&key, &id) {
            Some(record) => {
                let record = record.clone();
                self.parse(&record)
            }
            None => {
                debug!(entity = self.schema.name, ?id, "identifier not found in repository");
                self.clear();
                Ok(())
            }
        }
    }

    /// Serialize to the backend's flat record shape: snake_cased attribute
    /// names with cast-encoded values, and identifier references for every
    /// active immediate relation. Nested data is never inlined on output.
    pub fn to_backend(&self) -> serde_json::Value {
        let mut record = serde_json::Map::new();
        for attr in &self.attributes {
            let value = self.values.get(attr).cloned().unwrap_or(Value::Null);
            let raw = match self.schema.cast(attr) {
                Some(cast) => cast.encode(&value),
                None => value.into(),
            };
            record.insert(to_backend_name(attr), raw);
        }
        for (name, slot) in &self.relations {
            let reference = match slot {
                RelationSlot::One(entity) => entity.primary_key().clone().into(),
                RelationSlot::Many(collection) => serde_json::Value::Array(
                    collection
                        .iter()
                        .map(|member| member.primary_key().clone().into())
                        .collect(),
                ),
            };
            record.insert(to_backend_name(name), reference);
        }
        serde_json::Value::Object(record)
    }

    /// Snapshot of the graph in its internal shape: attributes under their
    /// internal names plus recursively snapshotted active relations. For
    /// read-only consumption, not for sending to the backend.
    pub fn to_js(&self) -> serde_json::Value {
        let mut snapshot = serde_json::Map::new();
        for attr in &self.attributes {
            let value = self.values.get(attr).cloned().unwrap_or(Value::Null);
            snapshot.insert(attr.to_string(), value.into());
        }
        for (name, slot) in &self.relations {
            let nested = match slot {
                RelationSlot::One(entity) => entity.to_js(),
                RelationSlot::Many(collection) => serde_json::Value::Array(
                    collection.iter().map(Entity::to_js).collect(),
                ),
            };
            snapshot.insert(name.to_string(), nested);
        }
        serde_json::Value::Object(snapshot)
    }

    /// Apply a flattened backend payload: attach every repository named by
    /// the relation mapping, then parse the primary record. Attachment
    /// strictly precedes parsing.
    pub fn from_backend(&mut self, payload: &BackendPayload) -> Result<(), Error> {
        relations::attach_repositories(self, &payload.repos, &payload.rel_mapping)?;
        self.parse(&payload.data)
    }

    // ===== Network lifecycle =====

    fn transport(&self) -> Result<Arc<dyn Transport>, Error> {
        self.transport.clone().ok_or_else(|| {
            Error::configuration(format!("no transport assigned to `{}`", self.schema.name))
        })
    }

    /// Resource root for this entity type.
    pub fn url(&self) -> Result<&str, Error> {
        self.url.as_deref().ok_or_else(|| {
            Error::configuration(format!("no resource URL for `{}`", self.schema.name))
        })
    }

    fn detail_url(&self) -> Result<String, Error> {
        let root = self.url()?;
        let key = match self.primary_key() {
            Value::Integer(id) => id.to_string(),
            Value::String(id) => id.clone(),
            other => {
                return Err(Error::configuration(format!(
                    "primary key of `{}` is not addressable: {other:?}",
                    self.schema.name
                )));
            }
        };
        Ok(format!("{root}/{key}"))
    }

    /// Fetch this entity's current state from the backend.
    pub async fn fetch(&mut self, query: &Query) -> Result<(), Error> {
        if self.is_new() {
            return Err(Error::configuration(format!(
                "cannot fetch `{}` without a primary key",
                self.schema.name
            )));
        }
        let transport = self.transport()?;
        let url = self.detail_url()?;

        self.requests.begin();
        let result = transport.fetch_entity(&url, query).await;
        self.requests.finish();

        self.from_backend(&result?)
    }

    /// Persist this entity's own record. On rejection the backend's
    /// validation details are captured into `validation_errors` and the
    /// error is re-raised.
    pub async fn save(&mut self, query: &Query) -> Result<(), Error> {
        self.validation_errors.clear();
        let transport = self.transport()?;
        let is_new = self.is_new();
        let url = if is_new {
            self.url()?.to_string()
        } else {
            self.detail_url()?
        };
        let record = self.to_backend();

        self.requests.begin();
        let result = transport.save_entity(&url, record, query, is_new).await;
        self.requests.finish();

        match result {
            Ok(payload) => self.from_backend(&payload),
            Err(err) => {
                if let Error::BackendValidation { errors } = &err {
                    self.validation_errors = errors.clone();
                }
                Err(err)
            }
        }
    }

    /// Persist this entity and its whole active-relation subtree in one
    /// atomic request, synthesizing placeholder identifiers for unsaved
    /// nodes.
    pub async fn save_all(&mut self) -> Result<(), Error> {
        self.validation_errors.clear();
        let transport = self.transport()?;
        let url = self.url()?.to_string();
        let document = self.to_backend_all();

        self.requests.begin();
        let result = transport.save_all(&url, &document).await;
        self.requests.finish();

        match result {
            Ok(payload) => self.from_backend(&payload),
            Err(err) => {
                if let Error::BackendValidation { errors } = &err {
                    self.validation_errors = errors.clone();
                }
                Err(err)
            }
        }
    }

    /// Delete this entity on the backend. Deleting an entity that was never
    /// persisted is a no-op; detaching it from an owning collection is the
    /// caller's explicit `remove` call.
    pub async fn delete(&mut self, query: &Query) -> Result<(), Error> {
        if self.is_new() {
            return Ok(());
        }
        let transport = self.transport()?;
        let url = self.detail_url()?;

        self.requests.begin();
        let result = transport.delete_entity(&url, query).await;
        self.requests.finish();

        result
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("schema", &self.schema.name)
            .field("values", &self.values)
            .field("active_relations", &self.active_relations)
            .field("pending_requests", &self.requests.pending())
            .finish()
    }
}

impl fmt::Debug for RelationSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationSlot::One(entity) => f.debug_tuple("One").field(entity).finish(),
            RelationSlot::Many(collection) => f.debug_tuple("Many").field(collection).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::{animal_with, ANIMAL};
    use serde_json::json;

    #[test]
    fn test_attribute_registry_is_captured_at_construction() {
        let animal = Entity::new(&ANIMAL).unwrap();
        assert_eq!(animal.attributes(), &["id", "name", "bornAt"]);
        assert!(animal.is_new());
        assert_eq!(animal.get("name"), Some(&Value::Null));
    }

    #[test]
    fn test_set_attribute_validates_against_registry() {
        let mut animal = Entity::new(&ANIMAL).unwrap();
        animal.set_attribute("name", "Rex".into()).unwrap();
        assert_eq!(animal.get("name"), Some(&Value::String("Rex".into())));

        let err = animal.set_attribute("wings", Value::Integer(2)).unwrap_err();
        assert!(matches!(err, Error::UnknownAttribute { .. }));
    }

    #[test]
    fn test_attribute_writes_are_observable() {
        let mut animal = Entity::new(&ANIMAL).unwrap();
        let mut changes = animal.subscribe();
        animal.set_attribute("name", "Rex".into()).unwrap();
        let change = changes.try_recv().unwrap();
        assert_eq!(change.field, "name");
        assert_eq!(change.value, Value::String("Rex".into()));
    }

    #[test]
    fn test_parse_rejects_non_object_payloads() {
        let mut animal = Entity::new(&ANIMAL).unwrap();
        let err = animal.parse(&json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, Error::InvalidPayload { .. }));
    }

    #[test]
    fn test_parse_ignores_unknown_keys() {
        let mut animal = Entity::new(&ANIMAL).unwrap();
        animal
            .parse(&json!({"id": 2, "name": "Monkey", "definitely_not_a_field": true}))
            .unwrap();
        assert_eq!(animal.get("id"), Some(&Value::Integer(2)));
        assert!(!animal.is_new());
    }

    #[test]
    fn test_parse_applies_casts() {
        let mut animal = Entity::new(&ANIMAL).unwrap();
        animal
            .parse(&json!({"id": 1, "born_at": "2021-03-04T10:00:00Z"}))
            .unwrap();
        assert!(animal.get("bornAt").unwrap().as_datetime().is_some());
    }

    #[test]
    fn test_parse_nested_relation_data() {
        let mut animal = animal_with(&["kind.breed"]);
        animal
            .parse(&json!({
                "id": 1,
                "name": "Rex",
                "kind": {"id": 4, "name": "Dog", "breed": {"id": 5, "name": "Dachshund"}}
            }))
            .unwrap();
        let kind = animal.one("kind").unwrap();
        assert_eq!(kind.get("name"), Some(&Value::String("Dog".into())));
        let breed = kind.one("breed").unwrap();
        assert_eq!(breed.get("name"), Some(&Value::String("Dachshund".into())));
    }

    #[test]
    fn test_round_trip_for_primitive_attributes() {
        let mut animal = Entity::new(&ANIMAL).unwrap();
        animal.set_attribute("id", Value::Integer(3)).unwrap();
        animal.set_attribute("name", "Rex".into()).unwrap();

        let record = animal.to_backend();
        let mut copy = Entity::new(&ANIMAL).unwrap();
        copy.parse(&record).unwrap();
        assert_eq!(copy.get("id"), animal.get("id"));
        assert_eq!(copy.get("name"), animal.get("name"));
    }

    #[test]
    fn test_to_backend_emits_references_not_nested_data() {
        let mut animal = animal_with(&["kind", "pastOwners"]);
        animal
            .parse(&json!({
                "id": 1,
                "kind": {"id": 4, "name": "Dog"},
                "past_owners": [{"id": 2, "name": "Ann"}, {"id": 9, "name": "Bob"}]
            }))
            .unwrap();

        let record = animal.to_backend();
        assert_eq!(record["kind"], json!(4));
        assert_eq!(record["past_owners"], json!([2, 9]));
    }

    #[test]
    fn test_to_js_mirrors_internal_shape() {
        let mut animal = animal_with(&["kind"]);
        animal
            .parse(&json!({"id": 1, "name": "Rex", "kind": {"id": 4, "name": "Dog"}}))
            .unwrap();
        let snapshot = animal.to_js();
        assert_eq!(snapshot["name"], json!("Rex"));
        assert_eq!(snapshot["kind"]["name"], json!("Dog"));
    }

    #[test]
    fn test_from_backend_resolves_identifier_through_repository() {
        let mut animal = animal_with(&["kind"]);
        let payload: BackendPayload = serde_json::from_value(json!({
            "data": {"id": 1, "name": "Rex", "kind": 7},
            "repos": {"animal_kind": [{"id": 7, "name": "Dog"}]},
            "relMapping": {"kind": "animal_kind"}
        }))
        .unwrap();
        animal.from_backend(&payload).unwrap();

        let kind = animal.one("kind").unwrap();
        assert_eq!(kind.get("name"), Some(&Value::String("Dog".into())));
        assert_eq!(kind.get("id"), Some(&Value::Integer(7)));
    }

    #[test]
    fn test_parked_repository_seeds_collection_members() {
        // The mapping names a relation of collection members that do not
        // exist yet; the repository parks on the collection and each member
        // seeds itself from it at construction.
        let mut animal = animal_with(&["pastOwners.town"]);
        let payload: BackendPayload = serde_json::from_value(json!({
            "data": {
                "id": 1,
                "past_owners": [
                    {"id": 2, "name": "Ann", "town": 5},
                    {"id": 3, "name": "Bob", "town": 6}
                ]
            },
            "repos": {
                "person_town": [
                    {"id": 5, "name": "Utrecht"},
                    {"id": 6, "name": "Leiden"}
                ]
            },
            "relMapping": {"past_owners.town": "person_town"}
        }))
        .unwrap();
        animal.from_backend(&payload).unwrap();

        let owners = animal.many("pastOwners").unwrap();
        assert_eq!(owners.len(), 2);
        let ann_town = owners.at(0).unwrap().one("town").unwrap();
        assert_eq!(ann_town.get("name"), Some(&Value::String("Utrecht".into())));
        let bob_town = owners.at(1).unwrap().one("town").unwrap();
        assert_eq!(bob_town.get("name"), Some(&Value::String("Leiden".into())));
    }

    #[test]
    fn test_mapping_for_inactive_relation_is_skipped() {
        // `owner` is declared on the schema but not activated here; a
        // backend echoing a repository for it must not abort the fetch.
        let mut animal = animal_with(&["kind"]);
        let payload: BackendPayload = serde_json::from_value(json!({
            "data": {"id": 1, "kind": 7, "owner": 3},
            "repos": {
                "animal_kind": [{"id": 7, "name": "Dog"}],
                "animal_owner": [{"id": 3, "name": "Ann"}]
            },
            "relMapping": {"kind": "animal_kind", "owner": "animal_owner"}
        }))
        .unwrap();
        animal.from_backend(&payload).unwrap();

        assert!(animal.one("owner").is_none());
        let kind = animal.one("kind").unwrap();
        assert_eq!(kind.get("name"), Some(&Value::String("Dog".into())));
    }

    #[test]
    fn test_unresolvable_identifier_clears_the_relation() {
        let mut animal = animal_with(&["kind"]);
        let payload: BackendPayload = serde_json::from_value(json!({
            "data": {"id": 1, "kind": 999},
            "repos": {"animal_kind": [{"id": 7, "name": "Dog"}]},
            "relMapping": {"kind": "animal_kind"}
        }))
        .unwrap();
        animal.from_backend(&payload).unwrap();
        assert!(animal.one("kind").unwrap().is_new());
    }

    #[test]
    fn test_clear_restores_originals() {
        let mut animal = Entity::from_data(
            &ANIMAL,
            &json!({"id": 1, "name": "Rex"}),
            EntityOptions::default(),
        )
        .unwrap();
        animal.set_attribute("name", "Spot".into()).unwrap();
        animal.clear();
        assert_eq!(animal.get("name"), Some(&Value::String("Rex".into())));
        assert_eq!(animal.get("id"), Some(&Value::Integer(1)));
    }
}
