// ── Resource-service supervisor ──
//
// Holds `id -> worker` for one managed collection and applies commands
// one at a time, in the order they were published. Worker panics and
// stop timeouts are contained here and recorded as `error` states.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{ServiceCommand, ServiceEvent, StateReporter, Worker, WorkerError, WorkerRegistry};
use crate::api::EntityApi;
use crate::bus::topic;
use crate::context::CoreContext;
use crate::error::CoreError;
use crate::model::{ManagedResource, State};
use crate::storage::{Filter, Pagination};

pub struct ResourceService<R> {
    inner: Arc<Inner<R>>,
    topic: String,
    subscription: u64,
}

struct Inner<R> {
    name: String,
    api: EntityApi<R>,
    registry: WorkerRegistry<R>,
    workers: Mutex<HashMap<String, Box<dyn Worker>>>,
    /// Held for a whole command so direct calls cannot interleave with the bus.
    ops: Mutex<()>,
    stop_timeout: Duration,
}

impl<R: ManagedResource> ResourceService<R> {
    /// Start consuming commands from `service.<name>`.
    pub fn start(name: &str, ctx: Arc<CoreContext>, registry: WorkerRegistry<R>) -> Self {
        let inner = Arc::new(Inner {
            name: name.to_owned(),
            api: EntityApi::new(Arc::clone(&ctx)),
            registry,
            workers: Mutex::new(HashMap::new()),
            ops: Mutex::new(()),
            stop_timeout: ctx.config.service.stop_timeout,
        });

        let topic = topic::service(name);
        let consumer = Arc::clone(&inner);
        let subscription = ctx.bus.subscribe(&topic, move |msg| {
            let consumer = Arc::clone(&consumer);
            async move {
                match msg.decode::<ServiceEvent>() {
                    Ok(event) => consumer.handle(event).await,
                    Err(e) => warn!(service = %consumer.name, error = %e, "bad service command"),
                }
            }
        });

        info!(
            service = name,
            providers = ?inner.registry.providers(),
            "resource service started"
        );
        Self {
            inner,
            topic,
            subscription,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Apply a command directly, bypassing the bus.
    pub async fn handle(&self, event: ServiceEvent) {
        self.inner.handle(event).await;
    }

    /// Ids with a live worker, sorted.
    pub async fn live_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.workers.lock().await.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Stop consuming commands and stop every worker.
    pub async fn shutdown(self) {
        let ctx = Arc::clone(self.inner.api.context());
        ctx.bus.unsubscribe(&self.topic, self.subscription);
        let _ops = self.inner.ops.lock().await;
        self.inner.unload_all().await;
        info!(service = %self.inner.name, "resource service stopped");
    }
}

impl<R: ManagedResource> Inner<R> {
    async fn handle(&self, event: ServiceEvent) {
        if event.entity_type != R::COLLECTION {
            debug!(
                service = %self.name,
                entity_type = %event.entity_type,
                "ignoring command for another collection"
            );
            return;
        }
        let _ops = self.ops.lock().await;
        debug!(service = %self.name, command = %event.command, id = %event.id, "service command");

        let result = match event.command {
            ServiceCommand::Add => match self.resolve(&event).await {
                Ok(resource) => self.add(resource).await,
                Err(e) => Err(e),
            },
            ServiceCommand::Start => match self.api.get_by_id(&event.id).await {
                Ok(resource) => self.add(resource).await,
                Err(e) => Err(e),
            },
            ServiceCommand::Remove | ServiceCommand::Stop => {
                self.remove(&event.id).await;
                Ok(())
            }
            ServiceCommand::Reload => self.reload(&event.id).await,
            ServiceCommand::LoadAll => self.load_all().await,
            ServiceCommand::UnloadAll => {
                self.unload_all().await;
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!(
                service = %self.name,
                command = %event.command,
                id = %event.id,
                error = %e,
                "service command failed"
            );
        }
    }

    /// The carried entity, or the stored one when none was carried.
    async fn resolve(&self, event: &ServiceEvent) -> Result<R, CoreError> {
        if event.data.is_null() {
            return self.api.get_by_id(&event.id).await;
        }
        let resource: R = serde_json::from_value(event.data.clone())?;
        Ok(resource)
    }

    async fn record(&self, id: &str, state: State) {
        match self.api.set_state(id, state).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(service = %self.name, id, "state not recorded, entity is gone");
            }
            Err(e) => warn!(service = %self.name, id, error = %e, "failed to record state"),
        }
    }

    async fn add(&self, resource: R) -> Result<(), CoreError> {
        let id = resource.id().to_owned();
        if !resource.enabled() {
            debug!(service = %self.name, id = %id, "resource disabled, not starting");
            self.remove(&id).await;
            return Ok(());
        }

        // Replace any running instance.
        let previous = self.workers.lock().await.remove(&id);
        if let Some(worker) = previous {
            if let Err(e) = self.stop_bounded(worker).await {
                warn!(service = %self.name, id = %id, error = %e, "previous worker did not stop cleanly");
            }
        }

        if self.registry.is_empty() {
            debug!(service = %self.name, id = %id, "no worker providers registered, not starting");
            return Ok(());
        }

        let reporter = StateReporter::new(self.api.clone(), id.clone());
        let mut worker = match self.registry.create(&resource, reporter) {
            Ok(worker) => worker,
            Err(e) => {
                self.record(&id, State::error(e.to_string())).await;
                return Err(e.into());
            }
        };

        let started = AssertUnwindSafe(worker.start()).catch_unwind().await;
        match started {
            Ok(Ok(())) => {
                let displaced = self.workers.lock().await.insert(id.clone(), worker);
                if let Some(stale) = displaced {
                    warn!(service = %self.name, id = %id, "another worker was running, stopping it");
                    if let Err(e) = self.stop_bounded(stale).await {
                        warn!(service = %self.name, id = %id, error = %e, "displaced worker did not stop cleanly");
                    }
                }
                self.record(&id, State::up("started")).await;
                info!(service = %self.name, id = %id, "worker started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.record(&id, State::error(e.to_string())).await;
                // Release whatever the failed start acquired.
                let _ = self.stop_bounded(worker).await;
                Err(e.into())
            }
            Err(_) => {
                let e = WorkerError::Panicked { stage: "start" };
                error!(service = %self.name, id = %id, "worker panicked during start");
                self.record(&id, State::error(e.to_string())).await;
                Err(e.into())
            }
        }
    }

    async fn remove(&self, id: &str) {
        let worker = self.workers.lock().await.remove(id);
        let state = match worker {
            None => State::down("stopped"),
            Some(worker) => match self.stop_bounded(worker).await {
                Ok(()) => {
                    info!(service = %self.name, id, "worker stopped");
                    State::down("stopped")
                }
                Err(e) => {
                    warn!(service = %self.name, id, error = %e, "worker stop failed");
                    State::error(e.to_string())
                }
            },
        };
        self.record(id, state).await;
    }

    async fn reload(&self, id: &str) -> Result<(), CoreError> {
        self.remove(id).await;
        let resource = match self.api.get_by_id(id).await {
            Ok(resource) => resource,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        if resource.enabled() {
            self.add(resource).await?;
        }
        Ok(())
    }

    async fn load_all(&self) -> Result<(), CoreError> {
        let enabled = self
            .api
            .list(&[Filter::eq("enabled", true)], &Pagination::unbounded())
            .await?;
        info!(service = %self.name, count = enabled.count, "loading enabled resources");
        let mut wanted = HashSet::with_capacity(enabled.data.len());
        for resource in enabled.data {
            let id = resource.id().to_owned();
            if let Err(e) = self.add(resource).await {
                warn!(service = %self.name, id = %id, error = %e, "failed to load resource");
            }
            wanted.insert(id);
        }

        // Workers whose entity is gone or no longer enabled.
        let stale: Vec<String> = self
            .workers
            .lock()
            .await
            .keys()
            .filter(|id| !wanted.contains(*id))
            .cloned()
            .collect();
        for id in stale {
            debug!(service = %self.name, id = %id, "resource no longer enabled, stopping");
            self.remove(&id).await;
        }
        Ok(())
    }

    async fn unload_all(&self) {
        let ids: Vec<String> = self.workers.lock().await.keys().cloned().collect();
        for id in ids {
            self.remove(&id).await;
        }
    }

    /// Stop with the configured timeout; a panic counts as failure.
    async fn stop_bounded(&self, mut worker: Box<dyn Worker>) -> Result<(), WorkerError> {
        let stopping = AssertUnwindSafe(worker.stop()).catch_unwind();
        match tokio::time::timeout(self.stop_timeout, stopping).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(WorkerError::Panicked { stage: "stop" }),
            Err(_) => Err(WorkerError::StopTimeout {
                timeout: self.stop_timeout,
            }),
        }
    }
}
