// ── Domain model ──
//
// Every persisted entity is a serde struct with camelCase field tags.
// The storage layer sees them as JSON documents keyed by
// `(collection, id)`; the tags double as the field paths accepted by
// filters and sort keys.

mod event;
mod hierarchy;
mod leaf;
mod resource;
mod user;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

pub use event::{Event, EventType};
pub use hierarchy::{Field, Node, Payload, Source};
pub use leaf::{
    Backup, Dashboard, DataRepository, Firmware, ForwardPayload, Settings, VirtualDevice,
    settings_key,
};
pub use resource::{
    Gateway, Handler, SCHEDULE_TYPE_SUNRISE, SCHEDULE_TYPE_SUNSET, Schedule, Task,
    VirtualAssistant,
};
pub use user::{ServiceToken, TokenHash, User};

/// Free-form key/value labels used for filtering and routing.
pub type Labels = BTreeMap<String, String>;

// ── Collection ──────────────────────────────────────────────────────

/// Every collection name the core knows about.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Collection {
    Gateway,
    Node,
    Source,
    Field,
    Handler,
    Task,
    Schedule,
    VirtualAssistant,
    Firmware,
    ForwardPayload,
    DataRepository,
    Dashboard,
    Settings,
    User,
    ServiceToken,
    VirtualDevice,
    Backup,
}

impl Collection {
    /// Collections whose rows are backed by a live worker.
    pub fn is_managed(self) -> bool {
        matches!(
            self,
            Self::Gateway | Self::Handler | Self::Task | Self::Schedule | Self::VirtualAssistant
        )
    }

    /// Direct child collection in the gateway → node → source → field tree.
    pub fn child(self) -> Option<Self> {
        match self {
            Self::Gateway => Some(Self::Node),
            Self::Node => Some(Self::Source),
            Self::Source => Some(Self::Field),
            _ => None,
        }
    }
}

// ── State ───────────────────────────────────────────────────────────

/// Observable status of a managed resource or a device-side entity.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Status {
    #[default]
    Unknown,
    Ok,
    Up,
    Down,
    Error,
    Unavailable,
}

/// Status plus a human-readable message and the time it was entered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

impl State {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            since: Some(Utc::now()),
        }
    }

    pub fn up(message: impl Into<String>) -> Self {
        Self::new(Status::Up, message)
    }

    pub fn down(message: impl Into<String>) -> Self {
        Self::new(Status::Down, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Status::Error, message)
    }
}

// ── Entity traits ───────────────────────────────────────────────────

/// A record persisted in one named collection.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: Collection;

    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
    fn modified_on(&self) -> Option<DateTime<Utc>>;
    fn set_modified_on(&mut self, at: DateTime<Utc>);
}

/// An entity kept alive by a resource service while `enabled` is set.
pub trait ManagedResource: Entity {
    fn enabled(&self) -> bool;
    fn set_enabled(&mut self, enabled: bool);
    fn state(&self) -> &State;
    fn set_state(&mut self, state: State);
    /// Provider type used to pick the worker factory (e.g. `mysensors`).
    fn provider_type(&self) -> &str;
}

/// Implements [`Entity`] for a struct with `id` and `modified_on` fields.
macro_rules! impl_entity {
    ($ty:ty, $collection:expr) => {
        impl $crate::model::Entity for $ty {
            const COLLECTION: $crate::model::Collection = $collection;

            fn id(&self) -> &str {
                &self.id
            }

            fn set_id(&mut self, id: String) {
                self.id = id;
            }

            fn modified_on(&self) -> Option<chrono::DateTime<chrono::Utc>> {
                self.modified_on
            }

            fn set_modified_on(&mut self, at: chrono::DateTime<chrono::Utc>) {
                self.modified_on = Some(at);
            }
        }
    };
}

/// Implements [`ManagedResource`] for a struct with `enabled` and `state`.
/// The closure-like third argument extracts the provider type.
macro_rules! impl_managed {
    ($ty:ty, |$this:ident| $provider:expr) => {
        impl $crate::model::ManagedResource for $ty {
            fn enabled(&self) -> bool {
                self.enabled
            }

            fn set_enabled(&mut self, enabled: bool) {
                self.enabled = enabled;
            }

            fn state(&self) -> &$crate::model::State {
                &self.state
            }

            fn set_state(&mut self, state: $crate::model::State) {
                self.state = state;
            }

            fn provider_type(&self) -> &str {
                let $this = self;
                $provider
            }
        }
    };
}

pub(crate) use impl_entity;
pub(crate) use impl_managed;
