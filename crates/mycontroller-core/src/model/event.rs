// ── Entity change events ──

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::Collection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
    Created,
    Updated,
    Deleted,
}

/// Published on `event.<entityType>` whenever an entity changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub entity_type: Collection,
    pub event_type: EventType,
    pub entity: serde_json::Value,
}

impl Event {
    pub fn new(entity_type: Collection, event_type: EventType, entity: serde_json::Value) -> Self {
        Self {
            entity_type,
            event_type,
            entity,
        }
    }

    /// Read a string field from the carried entity.
    pub fn entity_str(&self, key: &str) -> Option<&str> {
        self.entity.get(key).and_then(serde_json::Value::as_str)
    }

    /// Decode the carried entity into its concrete type.
    pub fn entity_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.entity)
    }
}
