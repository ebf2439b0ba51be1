use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Backend validation failures keyed by attribute name.
pub type ValidationErrors = HashMap<String, Vec<String>>;

/// Structured error types for graph operations.
///
/// Every failure mode surfaces to the immediate caller; nothing is retried
/// or swallowed inside the engine.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum Error {
    /// Missing transport, missing resource URL, or some other setup problem
    /// detected before a call is attempted.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A relation name that is not declared in the entity's schema table.
    #[error("unknown relation `{name}` on entity `{entity}`")]
    UnknownRelation { entity: String, name: String },

    /// An attribute name outside the entity's attribute registry.
    #[error("unknown attribute `{name}` on entity `{entity}`")]
    UnknownAttribute { entity: String, name: String },

    /// A repository path that would have to cross a second collection whose
    /// members do not exist yet. Explicitly unsupported.
    #[error("unsupported relation chain `{path}`: only one collection hop per path is supported")]
    UnsupportedRelationChain { path: String },

    /// A payload whose shape does not match the wire contract.
    #[error("invalid payload: {message}")]
    InvalidPayload { message: String },

    /// An entity whose primary key collides with an existing member.
    #[error("duplicate primary key {key} in collection of `{entity}`")]
    DuplicateEntity { entity: String, key: String },

    /// Pagination page or member index outside the valid range.
    #[error("out of range: {message}")]
    OutOfRange { message: String },

    /// The backend rejected a save; the per-attribute details are also
    /// captured on the entity for observation.
    #[error("backend rejected save with validation errors")]
    BackendValidation { errors: ValidationErrors },

    /// Failure inside the transport adapter (network, decode, HTTP status).
    #[error("transport error: {message}")]
    Transport { message: String },
}

impl Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Error::InvalidPayload {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
        }
    }
}
