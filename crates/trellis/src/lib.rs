//! Client-side object graph synchronized with a REST backend.
//!
//! Entity types are declared as static [`schema::EntitySchema`] tables;
//! instances are [`Entity`] records and [`Collection`] pages that parse the
//! backend's flattened payload shape (`data` + `repos` + `relMapping`),
//! serialize back to flat snake_case records, and flatten whole relation
//! subtrees into atomic save-all documents. Network I/O goes through the
//! [`Transport`] seam.

mod codec;
pub mod collection;
pub mod entity;
pub mod flatten;
pub mod lifecycle;
mod relations;
pub mod schema;
pub mod testing;
pub mod transport;

pub use collection::{Collection, CollectionOptions};
pub use entity::{Entity, EntityOptions, RelationSlot};
pub use flatten::next_placeholder_id;
pub use lifecycle::RequestState;
pub use schema::{Cast, DateTimeCast, EntitySchema, RelationDef, RelationKind};
pub use transport::{Query, Transport};

pub use trellis_api::{
    BackendPayload, ChangeReceiver, CollectionPayload, Error, FieldChange, Repository,
    SaveAllPayload, ValidationErrors, Value,
};
