//! Collection: an ordered, uniqueness-enforcing set of entities of one
//! schema, with page-window state over a larger backend result set.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;
use trellis_api::{BackendPayload, Error, Repository, Value};

use crate::codec::to_backend_name;
use crate::entity::{Entity, EntityOptions};
use crate::lifecycle::RequestState;
use crate::relations;
use crate::schema::EntitySchema;
use crate::transport::{Query, Transport};

/// Construction options for a collection.
#[derive(Default)]
pub struct CollectionOptions {
    /// Dotted relation paths activated on every member.
    pub relations: Vec<String>,
    pub transport: Option<Arc<dyn Transport>>,
    /// Resource root override; defaults to the schema's `backend_url`.
    pub url: Option<String>,
    /// Extra query parameters sent with every fetch.
    pub params: HashMap<String, String>,
    /// Page size. `None` disables pagination: fetches request everything
    /// and the page cursor stays meaningless.
    pub limit: Option<u64>,
}

pub struct Collection {
    schema: &'static EntitySchema,
    members: Vec<Entity>,
    active_relations: Vec<String>,
    repository: Option<Repository>,
    /// Repositories destined for members' own relations, keyed by the
    /// member-side relation name. Seeded into each member at construction.
    nested_repositories: HashMap<String, Repository>,
    params: HashMap<String, String>,
    transport: Option<Arc<dyn Transport>>,
    url: Option<String>,
    current_page: u64,
    limit: Option<u64>,
    total_records: u64,
    requests: RequestState,
}

impl Collection {
    pub fn new(schema: &'static EntitySchema) -> Result<Self, Error> {
        Self::with_options(schema, CollectionOptions::default())
    }

    pub fn with_options(
        schema: &'static EntitySchema,
        options: CollectionOptions,
    ) -> Result<Self, Error> {
        // Validate relation heads eagerly so a typo fails at declaration,
        // not at first parse.
        for path in &options.relations {
            let head = path.split('.').next().unwrap_or(path);
            if schema.relation(head).is_none() {
                return Err(Error::UnknownRelation {
                    entity: schema.name.to_string(),
                    name: head.to_string(),
                });
            }
        }
        Ok(Collection {
            schema,
            members: Vec::new(),
            active_relations: options.relations,
            repository: None,
            nested_repositories: HashMap::new(),
            params: options.params,
            transport: options.transport,
            url: options
                .url
                .or_else(|| schema.backend_url.map(str::to_string)),
            current_page: 1,
            limit: options.limit,
            total_records: 0,
            requests: RequestState::default(),
        })
    }

    pub fn schema(&self) -> &'static EntitySchema {
        self.schema
    }

    fn build_member(&self) -> Result<Entity, Error> {
        Entity::with_options(
            self.schema,
            EntityOptions {
                relations: self.active_relations.clone(),
                repository: None,
                nested_repositories: self.nested_repositories.clone(),
                transport: self.transport.clone(),
                url: self.url.clone(),
            },
        )
    }

    // ===== Membership =====

    /// Parse one backend record into a new member and append it.
    pub fn add(&mut self, record: &serde_json::Value) -> Result<&Entity, Error> {
        let mut entity = self.build_member()?;
        entity.parse(record)?;
        let index = self.add_entity(entity)?;
        Ok(&self.members[index])
    }

    pub fn add_many(&mut self, records: &[serde_json::Value]) -> Result<(), Error> {
        for record in records {
            self.add(record)?;
        }
        Ok(())
    }

    /// Append an already-built entity, enforcing primary key uniqueness.
    /// Entities without a primary key (unsaved) are always admitted.
    pub fn add_entity(&mut self, entity: Entity) -> Result<usize, Error> {
        let key = entity.primary_key();
        if !key.is_falsy() && self.members.iter().any(|m| m.primary_key().loose_eq(key)) {
            return Err(Error::DuplicateEntity {
                entity: self.schema.name.to_string(),
                key: serde_json::Value::from(key.clone()).to_string(),
            });
        }
        self.members.push(entity);
        Ok(self.members.len() - 1)
    }

    /// Remove and return the member at `index`.
    pub fn remove_at(&mut self, index: usize) -> Result<Entity, Error> {
        if index >= self.members.len() {
            return Err(Error::OutOfRange {
                message: format!(
                    "index {index} out of bounds for collection of {}",
                    self.members.len()
                ),
            });
        }
        Ok(self.members.remove(index))
    }

    /// Remove and return the member whose primary key loosely matches `id`,
    /// if present.
    pub fn remove_by_id(&mut self, id: &Value) -> Option<Entity> {
        let index = self
            .members
            .iter()
            .position(|m| m.primary_key().loose_eq(id))?;
        Some(self.members.remove(index))
    }

    /// Find a member by primary key, tolerating string/number mismatches.
    pub fn get(&self, id: impl Into<Value>) -> Option<&Entity> {
        let id = id.into();
        self.members.iter().find(|m| m.primary_key().loose_eq(&id))
    }

    pub fn get_mut(&mut self, id: impl Into<Value>) -> Option<&mut Entity> {
        let id = id.into();
        self.members
            .iter_mut()
            .find(|m| m.primary_key().loose_eq(&id))
    }

    /// Positional access; negative indices count from the end.
    pub fn at(&self, index: i64) -> Result<&Entity, Error> {
        let len = self.members.len() as i64;
        let resolved = if index < 0 { index + len } else { index };
        if resolved < 0 || resolved >= len {
            return Err(Error::OutOfRange {
                message: format!("index {index} out of bounds for collection of {len}"),
            });
        }
        Ok(&self.members[resolved as usize])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.members.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.members.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }

    // ===== Repositories =====

    pub(crate) fn set_repository(&mut self, repository: Repository) {
        self.repository = Some(repository);
    }

    pub(crate) fn register_nested_repository(&mut self, relation: &str, repository: Repository) {
        self.nested_repositories
            .insert(relation.to_string(), repository);
    }

    // ===== Backend codec =====

    /// Replace the membership with parsed backend records.
    pub fn parse(&mut self, data: &serde_json::Value) -> Result<(), Error> {
        let items = data.as_array().ok_or_else(|| {
            Error::invalid_payload(format!(
                "expected an array for `{}` collection, got {data}",
                self.schema.name
            ))
        })?;
        let mut members = Vec::with_capacity(items.len());
        for item in items {
            let mut entity = self.build_member()?;
            entity.parse(item)?;
            members.push(entity);
        }
        self.members = members;
        Ok(())
    }

    /// Replace the membership by resolving identifiers against the attached
    /// repository, preserving identifier order. Unresolvable identifiers
    /// are skipped.
    pub(crate) fn add_from_repository(&mut self, ids: &[serde_json::Value]) -> Result<(), Error> {
        let Some(repository) = self.repository.clone() else {
            debug!(
                entity = self.schema.name,
                "no repository attached, clearing collection"
            );
            self.members.clear();
            return Ok(());
        };
        let key = to_backend_name(self.schema.primary_key);
        let mut members = Vec::with_capacity(ids.len());
        for id in ids {
            let id = Value::from(id.clone());
            match repository.find_by(&key, &id) {
                Some(record) => {
                    let record = record.clone();
                    let mut entity = self.build_member()?;
                    entity.parse(&record)?;
                    members.push(entity);
                }
                None => {
                    debug!(entity = self.schema.name, ?id, "identifier not found in repository");
                }
            }
        }
        self.members = members;
        Ok(())
    }

    /// Apply a flattened backend payload: each record becomes a member with
    /// repositories attached before its data is parsed.
    pub fn from_backend(&mut self, payload: &BackendPayload) -> Result<(), Error> {
        let items = payload.data.as_array().ok_or_else(|| {
            Error::invalid_payload(format!(
                "expected an array for `{}` collection, got {}",
                self.schema.name, payload.data
            ))
        })?;
        let mut members = Vec::with_capacity(items.len());
        for item in items {
            let mut entity = self.build_member()?;
            relations::attach_repositories(&mut entity, &payload.repos, &payload.rel_mapping)?;
            entity.parse(item)?;
            members.push(entity);
        }
        self.members = members;
        Ok(())
    }

    // ===== Pagination =====

    pub fn current_page(&self) -> u64 {
        self.current_page
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    pub fn total_pages(&self) -> u64 {
        match self.limit {
            Some(limit) if limit > 0 => self.total_records.div_ceil(limit),
            _ => 0,
        }
    }

    pub fn has_next_page(&self) -> bool {
        self.limit.is_some() && self.current_page + 1 <= self.total_pages()
    }

    pub fn has_previous_page(&self) -> bool {
        self.limit.is_some() && self.current_page > 1
    }

    /// Move the page cursor without fetching. Page 1 is always in range so
    /// a fresh collection can be positioned before its first fetch.
    pub fn set_page(&mut self, page: u64) -> Result<(), Error> {
        if page < 1 || page > self.total_pages().max(1) {
            return Err(Error::OutOfRange {
                message: format!("page {page} out of range 1..={}", self.total_pages().max(1)),
            });
        }
        self.current_page = page;
        Ok(())
    }

    pub async fn get_page(&mut self, page: u64) -> Result<(), Error> {
        self.set_page(page)?;
        self.fetch().await
    }

    pub async fn get_next_page(&mut self) -> Result<(), Error> {
        if !self.has_next_page() {
            return Err(Error::OutOfRange {
                message: format!("no page after {}", self.current_page),
            });
        }
        self.current_page += 1;
        self.fetch().await
    }

    pub async fn get_previous_page(&mut self) -> Result<(), Error> {
        if !self.has_previous_page() {
            return Err(Error::OutOfRange {
                message: format!("no page before {}", self.current_page),
            });
        }
        self.current_page -= 1;
        self.fetch().await
    }

    // ===== Network lifecycle =====

    fn transport(&self) -> Result<Arc<dyn Transport>, Error> {
        self.transport.clone().ok_or_else(|| {
            Error::configuration(format!("no transport assigned to `{}`", self.schema.name))
        })
    }

    pub fn url(&self) -> Result<&str, Error> {
        self.url.as_deref().ok_or_else(|| {
            Error::configuration(format!("no resource URL for `{}`", self.schema.name))
        })
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

    /// Fetch the current page. The backend's `totalRecords` is taken as the
    /// authoritative count for the pagination window.
    pub async fn fetch(&mut self) -> Result<(), Error> {
        let transport = self.transport()?;
        let url = self.url()?.to_string();
        let mut query: Query = self.params.clone();
        if let Some(limit) = self.limit {
            query.insert("limit".to_string(), limit.to_string());
            query.insert(
                "offset".to_string(),
                ((self.current_page - 1) * limit).to_string(),
            );
        }

        self.requests.begin();
        let result = transport.fetch_collection(&url, &query).await;
        self.requests.finish();

        let payload = result?;
        self.from_backend(&payload.payload)?;
        if let Some(total) = payload.total_records {
            self.total_records = total;
        }
        Ok(())
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("schema", &self.schema.name)
            .field("len", &self.members.len())
            .field("current_page", &self.current_page)
            .field("total_records", &self.total_records)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::{ANIMAL, PERSON};
    use serde_json::json;

    #[test]
    fn test_duplicate_primary_keys_are_rejected() {
        let mut people = Collection::new(&PERSON).unwrap();
        people.add(&json!({"id": 1, "name": "Ann"})).unwrap();
        let err = people
            .add(&json!({"id": 1, "name": "Ann again"}))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateEntity { .. }));
        // String/number mismatch still counts as the same identifier.
        let err = people.add(&json!({"id": "1", "name": "Ann"})).unwrap_err();
        assert!(matches!(err, Error::DuplicateEntity { .. }));
        assert_eq!(people.len(), 1);
    }

    #[test]
    fn test_unsaved_members_bypass_uniqueness() {
        let mut people = Collection::new(&PERSON).unwrap();
        people.add_entity(Entity::new(&PERSON).unwrap()).unwrap();
        people.add_entity(Entity::new(&PERSON).unwrap()).unwrap();
        assert_eq!(people.len(), 2);
    }

    #[test]
    fn test_lookup_is_loose_on_identifier_type() {
        let mut people = Collection::new(&PERSON).unwrap();
        people.add(&json!({"id": 7, "name": "Ann"})).unwrap();
        assert!(people.get(7i64).is_some());
        assert!(people.get("7").is_some());
        assert!(people.get(8i64).is_none());
    }

    #[test]
    fn test_positional_access_wraps_negative_indices() {
        let mut people = Collection::new(&PERSON).unwrap();
        people
            .add_many(&[json!({"id": 1}), json!({"id": 2}), json!({"id": 3})])
            .unwrap();
        assert_eq!(people.at(0).unwrap().primary_key(), &Value::Integer(1));
        assert_eq!(people.at(-1).unwrap().primary_key(), &Value::Integer(3));
        assert!(matches!(people.at(3), Err(Error::OutOfRange { .. })));
        assert!(matches!(people.at(-4), Err(Error::OutOfRange { .. })));
    }

    #[test]
    fn test_remove_detaches_and_returns_the_member() {
        let mut people = Collection::new(&PERSON).unwrap();
        people
            .add_many(&[json!({"id": 1}), json!({"id": 2})])
            .unwrap();
        let removed = people.remove_by_id(&Value::Integer(1)).unwrap();
        assert_eq!(removed.primary_key(), &Value::Integer(1));
        assert_eq!(people.len(), 1);
        assert!(people.remove_by_id(&Value::Integer(99)).is_none());
        assert!(matches!(people.remove_at(5), Err(Error::OutOfRange { .. })));
    }

    #[test]
    fn test_unknown_relation_fails_at_declaration() {
        let err = Collection::with_options(
            &ANIMAL,
            CollectionOptions {
                relations: vec!["wings".to_string()],
                ..Default::default()
            },
        )
        .expect_err("undeclared relation must fail");
        assert!(matches!(err, Error::UnknownRelation { .. }));
    }

    #[test]
    fn test_parse_replaces_membership() {
        let mut people = Collection::new(&PERSON).unwrap();
        people.add(&json!({"id": 99})).unwrap();
        people
            .parse(&json!([{"id": 1, "name": "Ann"}, {"id": 2, "name": "Bob"}]))
            .unwrap();
        assert_eq!(people.len(), 2);
        assert!(people.get(99i64).is_none());
    }

    #[test]
    fn test_repository_resolution_preserves_order_and_skips_missing() {
        let mut people = Collection::new(&PERSON).unwrap();
        people.set_repository(Repository::new(vec![
            json!({"id": 2, "name": "Bob"}),
            json!({"id": 1, "name": "Ann"}),
        ]));
        people
            .add_from_repository(&[json!(1), json!(404), json!(2)])
            .unwrap();
        assert_eq!(people.len(), 2);
        assert_eq!(people.at(0).unwrap().primary_key(), &Value::Integer(1));
        assert_eq!(people.at(1).unwrap().primary_key(), &Value::Integer(2));
    }

    #[test]
    fn test_pagination_window() {
        let mut people = Collection::with_options(
            &PERSON,
            CollectionOptions {
                limit: Some(25),
                ..Default::default()
            },
        )
        .unwrap();
        people.total_records = 50;

        assert_eq!(people.total_pages(), 2);
        assert!(people.has_next_page());
        assert!(!people.has_previous_page());

        people.set_page(2).unwrap();
        assert!(!people.has_next_page());
        assert!(people.has_previous_page());

        assert!(matches!(people.set_page(0), Err(Error::OutOfRange { .. })));
        assert!(matches!(people.set_page(3), Err(Error::OutOfRange { .. })));
    }

    #[test]
    fn test_unpaginated_collections_report_no_pages() {
        let mut people = Collection::new(&PERSON).unwrap();
        people.total_records = 50;
        assert_eq!(people.total_pages(), 0);
        assert!(!people.has_next_page());
        assert!(!people.has_previous_page());
        // Page 1 stays addressable even without a limit.
        people.set_page(1).unwrap();
        assert!(matches!(people.set_page(2), Err(Error::OutOfRange { .. })));
    }
}
