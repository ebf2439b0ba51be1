//! Field-change notifications.
//!
//! Entities notify observers of attribute writes through a broadcast
//! channel. Sends are fire-and-forget: an entity with no subscribers pays
//! nothing beyond the failed send.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::value::Value;

/// One observed attribute write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Internal attribute name.
    pub field: String,
    /// The value after the write.
    pub value: Value,
}

pub type ChangeSender = broadcast::Sender<FieldChange>;
pub type ChangeReceiver = broadcast::Receiver<FieldChange>;

/// Buffer depth before slow subscribers start lagging.
pub const CHANGE_BUFFER: usize = 64;

pub fn change_channel() -> ChangeSender {
    broadcast::channel(CHANGE_BUFFER).0
}
