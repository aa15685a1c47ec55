// ── Managed resources ──
//
// Configuration entities that a resource service turns into live workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Collection, Labels, State, impl_entity, impl_managed};

/// A gateway connection (serial, MQTT, HTTP, ...). The `provider` object
/// carries the driver configuration; its `type` key selects the driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gateway {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub provider: serde_json::Value,
    /// Delay before the driver retries a dropped connection, humantime format.
    #[serde(default)]
    pub reconnect_delay: Option<String>,
    #[serde(default)]
    pub state: State,
    #[serde(default)]
    pub modified_on: Option<DateTime<Utc>>,
}

impl_entity!(Gateway, Collection::Gateway);
impl_managed!(Gateway, |gw| gw
    .provider
    .get("type")
    .and_then(serde_json::Value::as_str)
    .unwrap_or_default());

/// A notification backend (email, SMS, webhook, telegram, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handler {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub labels: Labels,
    #[serde(rename = "type", default)]
    pub handler_type: String,
    #[serde(default)]
    pub spec: serde_json::Value,
    #[serde(default)]
    pub state: State,
    #[serde(default)]
    pub modified_on: Option<DateTime<Utc>>,
}

impl_entity!(Handler, Collection::Handler);
impl_managed!(Handler, |h| &h.handler_type);

/// An event-driven automation rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub labels: Labels,
    /// Evaluation mode, e.g. `event` or `interval`.
    #[serde(default)]
    pub evaluation_type: String,
    #[serde(default)]
    pub spec: serde_json::Value,
    #[serde(default)]
    pub handlers: Vec<String>,
    #[serde(default)]
    pub state: State,
    #[serde(default)]
    pub modified_on: Option<DateTime<Utc>>,
}

impl_entity!(Task, Collection::Task);
impl_managed!(Task, |t| &t.evaluation_type);

/// Schedule kinds that depend on the daily sun position.
pub const SCHEDULE_TYPE_SUNRISE: &str = "sunrise";
pub const SCHEDULE_TYPE_SUNSET: &str = "sunset";

/// A time-driven trigger (cron, simple repeat, sunrise, sunset).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub labels: Labels,
    #[serde(rename = "type", default)]
    pub schedule_type: String,
    #[serde(default)]
    pub spec: serde_json::Value,
    #[serde(default)]
    pub handlers: Vec<String>,
    #[serde(default)]
    pub state: State,
    #[serde(default)]
    pub modified_on: Option<DateTime<Utc>>,
}

impl Schedule {
    pub fn is_sun_based(&self) -> bool {
        self.schedule_type == SCHEDULE_TYPE_SUNRISE || self.schedule_type == SCHEDULE_TYPE_SUNSET
    }
}

impl_entity!(Schedule, Collection::Schedule);
impl_managed!(Schedule, |s| &s.schedule_type);

/// A voice-assistant bridge (Alexa, Google).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualAssistant {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub provider_type: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub state: State,
    #[serde(default)]
    pub modified_on: Option<DateTime<Utc>>,
}

impl_entity!(VirtualAssistant, Collection::VirtualAssistant);
impl_managed!(VirtualAssistant, |va| &va.provider_type);
