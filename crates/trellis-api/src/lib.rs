//! Shared types for the trellis object-graph layer: the internal attribute
//! value representation, the flattened wire payload shapes, the error
//! taxonomy, and field-change notification types.
//!
//! Engine logic lives in the `trellis` crate; this crate is dependency-light
//! so transport adapters can speak the wire contract without pulling in the
//! graph engine.

pub mod error;
pub mod payload;
pub mod streaming;
pub mod value;

pub use error::{Error, ValidationErrors};
pub use payload::{BackendPayload, CollectionPayload, Repository, SaveAllPayload};
pub use streaming::{change_channel, ChangeReceiver, ChangeSender, FieldChange, CHANGE_BUFFER};
pub use value::Value;
