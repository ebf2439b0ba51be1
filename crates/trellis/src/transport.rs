//! Transport seam.
//!
//! The engine never performs network I/O itself; every network operation
//! goes through a `Transport` trait object. Implementations decide the
//! HTTP client, retry policy and authentication. The engine's only
//! requirements are the call/return contracts below; a queued-response
//! double for tests lives in [`crate::testing::FakeTransport`].

use async_trait::async_trait;
use std::collections::HashMap;

use trellis_api::{BackendPayload, CollectionPayload, Error, SaveAllPayload};

/// Query parameters merged into a request.
pub type Query = HashMap<String, String>;

/// Adapter performing the actual backend calls.
///
/// Failures map to [`Error::Transport`], except rejected saves which must
/// surface as [`Error::BackendValidation`] so the engine can capture the
/// per-attribute details before re-raising.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch one entity's flattened payload.
    async fn fetch_entity(&self, url: &str, query: &Query) -> Result<BackendPayload, Error>;

    /// Persist one entity record. `is_new` distinguishes create from update.
    async fn save_entity(
        &self,
        url: &str,
        record: serde_json::Value,
        query: &Query,
        is_new: bool,
    ) -> Result<BackendPayload, Error>;

    /// Delete one entity.
    async fn delete_entity(&self, url: &str, query: &Query) -> Result<(), Error>;

    /// Fetch a page of records plus the authoritative total.
    async fn fetch_collection(&self, url: &str, query: &Query)
        -> Result<CollectionPayload, Error>;

    /// Persist a flattened graph atomically.
    async fn save_all(&self, url: &str, document: &SaveAllPayload)
        -> Result<BackendPayload, Error>;
}
