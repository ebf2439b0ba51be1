//! Static entity type tables.
//!
//! Each entity type is declared once as a `&'static EntitySchema`: its
//! attribute registry, its relation table and its per-attribute casts.
//! Relation paths are validated against this table; nothing is discovered
//! by reflection at runtime.

use std::fmt;

use trellis_api::{Error, Value};

/// Cardinality of a declared relation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelationKind {
    /// The relation field holds a single related entity.
    One,
    /// The relation field holds an ordered collection of related entities.
    Many,
}

/// One declared relation: its internal name, cardinality and target type.
///
/// The target is a fn pointer so schema graphs may reference each other
/// cyclically (entity A relating to B and back).
pub struct RelationDef {
    pub name: &'static str,
    pub kind: RelationKind,
    pub target: fn() -> &'static EntitySchema,
}

impl RelationDef {
    pub fn target(&self) -> &'static EntitySchema {
        (self.target)()
    }
}

impl fmt::Debug for RelationDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationDef")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("target", &self.target().name)
            .finish()
    }
}

/// Per-attribute value transform between the backend's raw representation
/// and the internal one.
pub trait Cast: Send + Sync {
    /// Backend raw value to internal value. Fails when the raw value cannot
    /// represent the attribute (malformed payload).
    fn decode(&self, raw: &serde_json::Value) -> Result<Value, Error>;

    /// Internal value back to the backend's raw representation.
    fn encode(&self, value: &Value) -> serde_json::Value;
}

/// Built-in cast for RFC 3339 datetime attributes.
pub struct DateTimeCast;

impl Cast for DateTimeCast {
    fn decode(&self, raw: &serde_json::Value) -> Result<Value, Error> {
        match raw {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::String(s) => {
                let parsed = chrono::DateTime::parse_from_rfc3339(s).map_err(|err| {
                    Error::invalid_payload(format!("invalid datetime `{s}`: {err}"))
                })?;
                Ok(Value::from_datetime(parsed.with_timezone(&chrono::Utc)))
            }
            other => Err(Error::invalid_payload(format!(
                "expected datetime string, got {other}"
            ))),
        }
    }

    fn encode(&self, value: &Value) -> serde_json::Value {
        match value {
            Value::DateTime(s) => serde_json::Value::String(s.clone()),
            Value::Null => serde_json::Value::Null,
            other => other.clone().into(),
        }
    }
}

/// Static description of one entity type.
///
/// `attributes`, `primary_key` and relation names use the internal casing
/// convention (camelCase); the codec converts to and from the backend's
/// snake_case mechanically.
pub struct EntitySchema {
    /// Type name, used in error messages and logging.
    pub name: &'static str,
    /// Internal name of the identifier attribute.
    pub primary_key: &'static str,
    /// Every persisted data attribute, in declaration order.
    pub attributes: &'static [&'static str],
    /// Declared relations; only these may be activated on an instance.
    pub relations: &'static [RelationDef],
    /// Per-attribute casts, keyed by internal attribute name.
    pub casts: &'static [(&'static str, &'static dyn Cast)],
    /// Resource root for network operations, when the type has one.
    pub backend_url: Option<&'static str>,
}

impl EntitySchema {
    /// Resolve an internal attribute name to its schema-owned `&'static str`.
    pub fn attribute(&self, name: &str) -> Option<&'static str> {
        self.attributes.iter().copied().find(|attr| *attr == name)
    }

    pub fn relation(&self, name: &str) -> Option<&'static RelationDef> {
        self.relations.iter().find(|def| def.name == name)
    }

    pub fn cast(&self, attribute: &str) -> Option<&'static dyn Cast> {
        self.casts
            .iter()
            .find(|(name, _)| *name == attribute)
            .map(|(_, cast)| *cast)
    }
}

impl fmt::Debug for EntitySchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitySchema")
            .field("name", &self.name)
            .field("primary_key", &self.primary_key)
            .field("attributes", &self.attributes)
            .field("relations", &self.relations)
            .finish()
    }
}
