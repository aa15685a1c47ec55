// ── Gateway → Node → Source → Field ──
//
// Device-side entities reported by gateway drivers. Parent links are plain
// string ids; the deletion engine keeps the tree consistent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Collection, Labels, State, impl_entity};

/// A device attached to a gateway.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub gateway_id: String,
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub others: serde_json::Value,
    #[serde(default)]
    pub state: State,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_on: Option<DateTime<Utc>>,
}

impl_entity!(Node, Collection::Node);

impl Node {
    /// Canonical storage id for a node under a gateway.
    pub fn storage_id(gateway_id: &str, node_id: &str) -> String {
        format!("{gateway_id}.{node_id}")
    }
}

/// A sensor or actuator exposed by a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub gateway_id: String,
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub source_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_on: Option<DateTime<Utc>>,
}

impl_entity!(Source, Collection::Source);

impl Source {
    pub fn storage_id(gateway_id: &str, node_id: &str, source_id: &str) -> String {
        format!("{gateway_id}.{node_id}.{source_id}")
    }
}

/// A value with the time it was observed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A single measured or controlled value of a source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub gateway_id: String,
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub source_id: String,
    #[serde(default)]
    pub field_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub metric_type: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub current: Payload,
    #[serde(default)]
    pub previous: Payload,
    #[serde(default)]
    pub no_change_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_on: Option<DateTime<Utc>>,
}

impl_entity!(Field, Collection::Field);

impl Field {
    pub fn storage_id(gateway_id: &str, node_id: &str, source_id: &str, field_id: &str) -> String {
        format!("{gateway_id}.{node_id}.{source_id}.{field_id}")
    }

    /// Shift `current` into `previous` and record a new value.
    pub fn record(&mut self, value: serde_json::Value, at: DateTime<Utc>) {
        if self.current.value != value {
            self.no_change_since = Some(at);
        }
        self.previous = std::mem::take(&mut self.current);
        self.current = Payload {
            value,
            timestamp: Some(at),
        };
        self.last_seen = Some(at);
    }
}
