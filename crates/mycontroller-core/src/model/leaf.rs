// ── Leaf collections ──
//
// Entities without cascade relations or live workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Collection, Labels, impl_entity};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Firmware {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub labels: Labels,
    /// File metadata (name, size, checksum) of the uploaded blob.
    #[serde(default)]
    pub file: serde_json::Value,
    #[serde(default)]
    pub modified_on: Option<DateTime<Utc>>,
}

impl_entity!(Firmware, Collection::Firmware);

/// Mirrors every update of `src_field_id` into `dst_field_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardPayload {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub src_field_id: String,
    #[serde(default)]
    pub dst_field_id: String,
    #[serde(default)]
    pub modified_on: Option<DateTime<Utc>>,
}

impl_entity!(ForwardPayload, Collection::ForwardPayload);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRepository {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub modified_on: Option<DateTime<Utc>>,
}

impl_entity!(DataRepository, Collection::DataRepository);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub modified_on: Option<DateTime<Utc>>,
}

impl_entity!(Dashboard, Collection::Dashboard);

/// Well-known settings document ids.
pub mod settings_key {
    pub const SYSTEM: &str = "system";
    pub const VERSION: &str = "version";
    pub const ANALYTICS: &str = "analytics";
}

/// A named settings document; `spec` holds the typed payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub spec: serde_json::Value,
    #[serde(default)]
    pub modified_on: Option<DateTime<Utc>>,
}

impl_entity!(Settings, Collection::Settings);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualDevice {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub traits: serde_json::Value,
    #[serde(default)]
    pub modified_on: Option<DateTime<Utc>>,
}

impl_entity!(VirtualDevice, Collection::VirtualDevice);

/// A configured backup location (disk, remote share, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub provider_type: String,
    #[serde(default)]
    pub spec: serde_json::Value,
    #[serde(default)]
    pub modified_on: Option<DateTime<Utc>>,
}

impl_entity!(Backup, Collection::Backup);
