// ── Resource services ──
//
// Every managed collection (gateway, handler, task, schedule, virtual
// assistant) is backed by a resource service: a supervisor that turns
// enabled entities into live workers and reacts to commands published on
// `service.<name>`. Provider-specific behaviour plugs in through
// `WorkerFactory`; the core only needs `start` and a bounded `stop`.

mod api;
mod supervisor;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;
use tracing::warn;

pub use api::ResourceApi;
pub use supervisor::ResourceService;

use crate::api::EntityApi;
use crate::bus::BusPayload;
use crate::model::{Collection, ManagedResource, State};

/// Names the built-in resource services are started with.
pub mod service_name {
    pub const GATEWAY: &str = "gateway";
    pub const HANDLER: &str = "handler";
    pub const TASK: &str = "task";
    pub const SCHEDULE: &str = "schedule";
    pub const VIRTUAL_ASSISTANT: &str = "virtual_assistant";
}

// ── Commands ────────────────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ServiceCommand {
    /// Start a worker from the carried (or stored) configuration.
    Add,
    /// Same as `Add`, always reading the stored configuration.
    Start,
    Remove,
    Stop,
    /// Remove, then add again if the entity is enabled.
    Reload,
    LoadAll,
    UnloadAll,
}

/// A command for one resource service. `data` optionally carries the
/// entity; when it is null the service reads it from storage by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEvent {
    #[serde(rename = "type")]
    pub entity_type: Collection,
    pub command: ServiceCommand,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ServiceEvent {
    pub fn new(entity_type: Collection, command: ServiceCommand, id: impl Into<String>) -> Self {
        Self {
            entity_type,
            command,
            id: id.into(),
            data: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

impl BusPayload for ServiceEvent {
    const TYPE_TAG: &'static str = "service_event";
}

// ── Workers ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("no worker factory for provider '{provider}'")]
    UnknownProvider { provider: String },

    #[error("invalid worker configuration: {0}")]
    InvalidConfig(String),

    #[error("worker failed to start: {0}")]
    StartFailed(String),

    #[error("worker failed to stop: {0}")]
    StopFailed(String),

    #[error("worker did not stop within {}s", .timeout.as_secs())]
    StopTimeout { timeout: Duration },

    #[error("worker panicked during {stage}")]
    Panicked { stage: &'static str },
}

/// A long-running task owned by a resource service.
///
/// `stop` must be idempotent and return promptly; the supervisor gives up
/// waiting after its stop timeout and records an error state.
#[async_trait]
pub trait Worker: Send {
    async fn start(&mut self) -> Result<(), WorkerError>;
    async fn stop(&mut self) -> Result<(), WorkerError>;
}

/// Lets a running worker publish its own state (e.g. `down` while a
/// gateway reconnects).
pub struct StateReporter<R> {
    api: EntityApi<R>,
    id: String,
}

impl<R> Clone for StateReporter<R> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            id: self.id.clone(),
        }
    }
}

impl<R: ManagedResource> StateReporter<R> {
    pub(crate) fn new(api: EntityApi<R>, id: String) -> Self {
        Self { api, id }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn report(&self, state: State) {
        if let Err(e) = self.api.set_state(&self.id, state).await {
            warn!(collection = %R::COLLECTION, id = %self.id, error = %e, "state update failed");
        }
    }
}

/// Builds a worker for one resource of a given provider type.
pub trait WorkerFactory<R>: Send + Sync {
    fn create(
        &self,
        resource: &R,
        reporter: StateReporter<R>,
    ) -> Result<Box<dyn Worker>, WorkerError>;
}

impl<R, F> WorkerFactory<R> for F
where
    F: Fn(&R, StateReporter<R>) -> Result<Box<dyn Worker>, WorkerError> + Send + Sync,
{
    fn create(
        &self,
        resource: &R,
        reporter: StateReporter<R>,
    ) -> Result<Box<dyn Worker>, WorkerError> {
        self(resource, reporter)
    }
}

/// Factories keyed by provider type, with an optional catch-all.
pub struct WorkerRegistry<R> {
    factories: HashMap<String, Arc<dyn WorkerFactory<R>>>,
    fallback: Option<Arc<dyn WorkerFactory<R>>>,
}

impl<R> Default for WorkerRegistry<R> {
    fn default() -> Self {
        Self {
            factories: HashMap::new(),
            fallback: None,
        }
    }
}

impl<R: ManagedResource> WorkerRegistry<R> {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, provider: &str, factory: impl WorkerFactory<R> + 'static) -> Self {
        self.factories.insert(provider.to_owned(), Arc::new(factory));
        self
    }

    /// Used when no provider-specific factory matches.
    #[must_use]
    pub fn with_fallback(mut self, factory: impl WorkerFactory<R> + 'static) -> Self {
        self.fallback = Some(Arc::new(factory));
        self
    }

    /// No provider factory and no fallback.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty() && self.fallback.is_none()
    }

    pub fn providers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub(crate) fn create(
        &self,
        resource: &R,
        reporter: StateReporter<R>,
    ) -> Result<Box<dyn Worker>, WorkerError> {
        let provider = resource.provider_type();
        let factory = self
            .factories
            .get(provider)
            .or(self.fallback.as_ref())
            .ok_or_else(|| WorkerError::UnknownProvider {
                provider: provider.to_owned(),
            })?;
        factory.create(resource, reporter)
    }
}
