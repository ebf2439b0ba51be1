//! Test doubles and shared schema fixtures.
//!
//! `FakeTransport` is a queued-response transport: tests enqueue the
//! payloads or errors the next calls should yield, run the code under
//! test, then assert on the recorded calls. An exhausted queue yields a
//! transport error rather than a panic so lifecycle accounting can be
//! asserted on the failure path too.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use trellis_api::{BackendPayload, CollectionPayload, Error, SaveAllPayload};

use crate::transport::{Query, Transport};

/// One recorded transport call.
#[derive(Debug, Clone)]
pub struct FakeCall {
    pub method: &'static str,
    pub url: String,
    pub query: Query,
    pub body: Option<serde_json::Value>,
}

#[derive(Default)]
pub struct FakeTransport {
    entity_responses: Mutex<VecDeque<Result<BackendPayload, Error>>>,
    collection_responses: Mutex<VecDeque<Result<CollectionPayload, Error>>>,
    delete_responses: Mutex<VecDeque<Result<(), Error>>>,
    calls: Mutex<Vec<FakeCall>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue the response for the next entity fetch/save/save_all call.
    pub fn queue_entity(&self, response: Result<BackendPayload, Error>) {
        self.entity_responses.lock().unwrap().push_back(response);
    }

    /// Enqueue the response for the next collection fetch.
    pub fn queue_collection(&self, response: Result<CollectionPayload, Error>) {
        self.collection_responses.lock().unwrap().push_back(response);
    }

    /// Enqueue the response for the next delete.
    pub fn queue_delete(&self, response: Result<(), Error>) {
        self.delete_responses.lock().unwrap().push_back(response);
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, method: &'static str, url: &str, query: &Query, body: Option<serde_json::Value>) {
        self.calls.lock().unwrap().push(FakeCall {
            method,
            url: url.to_string(),
            query: query.clone(),
            body,
        });
    }

    fn next_entity(&self, method: &'static str) -> Result<BackendPayload, Error> {
        self.entity_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::transport(format!("no queued response for {method}"))))
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn fetch_entity(&self, url: &str, query: &Query) -> Result<BackendPayload, Error> {
        self.record("fetch_entity", url, query, None);
        self.next_entity("fetch_entity")
    }

    async fn save_entity(
        &self,
        url: &str,
        record: serde_json::Value,
        query: &Query,
        is_new: bool,
    ) -> Result<BackendPayload, Error> {
        let method = if is_new { "create_entity" } else { "update_entity" };
        self.record(method, url, query, Some(record));
        self.next_entity(method)
    }

    async fn delete_entity(&self, url: &str, query: &Query) -> Result<(), Error> {
        self.record("delete_entity", url, query, None);
        self.delete_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::transport("no queued response for delete_entity")))
    }

    async fn fetch_collection(
        &self,
        url: &str,
        query: &Query,
    ) -> Result<CollectionPayload, Error> {
        self.record("fetch_collection", url, query, None);
        self.collection_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::transport("no queued response for fetch_collection")))
    }

    async fn save_all(&self, url: &str, document: &SaveAllPayload) -> Result<BackendPayload, Error> {
        let body = serde_json::to_value(document).ok();
        self.record("save_all", url, &Query::new(), body);
        self.next_entity("save_all")
    }
}

/// A small zoo of schemas exercising every relation shape: singular,
/// plural, nested chains and a datetime cast.
pub mod fixtures {
    use crate::entity::{Entity, EntityOptions};
    use crate::schema::{DateTimeCast, EntitySchema, RelationDef, RelationKind};

    fn kind_schema() -> &'static EntitySchema {
        &KIND
    }

    fn breed_schema() -> &'static EntitySchema {
        &BREED
    }

    fn person_schema() -> &'static EntitySchema {
        &PERSON
    }

    fn location_schema() -> &'static EntitySchema {
        &LOCATION
    }

    pub static LOCATION: EntitySchema = EntitySchema {
        name: "location",
        primary_key: "id",
        attributes: &["id", "name"],
        relations: &[],
        casts: &[],
        backend_url: Some("api/location"),
    };

    pub static BREED: EntitySchema = EntitySchema {
        name: "breed",
        primary_key: "id",
        attributes: &["id", "name"],
        relations: &[RelationDef {
            name: "location",
            kind: RelationKind::One,
            target: location_schema,
        }],
        casts: &[],
        backend_url: None,
    };

    pub static KIND: EntitySchema = EntitySchema {
        name: "kind",
        primary_key: "id",
        attributes: &["id", "name"],
        relations: &[
            RelationDef {
                name: "breed",
                kind: RelationKind::One,
                target: breed_schema,
            },
            RelationDef {
                name: "location",
                kind: RelationKind::One,
                target: location_schema,
            },
        ],
        casts: &[],
        backend_url: None,
    };

    pub static PERSON: EntitySchema = EntitySchema {
        name: "person",
        primary_key: "id",
        attributes: &["id", "name"],
        relations: &[RelationDef {
            name: "town",
            kind: RelationKind::One,
            target: location_schema,
        }],
        casts: &[],
        backend_url: Some("api/person"),
    };

    pub static ANIMAL: EntitySchema = EntitySchema {
        name: "animal",
        primary_key: "id",
        attributes: &["id", "name", "bornAt"],
        relations: &[
            RelationDef {
                name: "kind",
                kind: RelationKind::One,
                target: kind_schema,
            },
            RelationDef {
                name: "owner",
                kind: RelationKind::One,
                target: person_schema,
            },
            RelationDef {
                name: "pastOwners",
                kind: RelationKind::Many,
                target: person_schema,
            },
        ],
        casts: &[("bornAt", &DateTimeCast)],
        backend_url: Some("api/animal"),
    };

    /// An animal with the given relation paths activated.
    pub fn animal_with(relations: &[&str]) -> Entity {
        Entity::with_options(
            &ANIMAL,
            EntityOptions {
                relations: relations.iter().map(|p| p.to_string()).collect(),
                ..Default::default()
            },
        )
        .expect("fixture relations are declared in the schema")
    }
}
