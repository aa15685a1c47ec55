// ── Resource-service API ──
//
// Entity-level operations on managed resources. Each one persists what
// it must through `EntityApi` and then publishes the matching command;
// the service applies it asynchronously.

use std::sync::Arc;

use tracing::debug;

use super::{ServiceCommand, ServiceEvent};
use crate::api::EntityApi;
use crate::bus::topic;
use crate::context::CoreContext;
use crate::error::CoreError;
use crate::model::{ManagedResource, State};

pub struct ResourceApi<R> {
    api: EntityApi<R>,
    topic: String,
}

impl<R> Clone for ResourceApi<R> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            topic: self.topic.clone(),
        }
    }
}

impl<R: ManagedResource> ResourceApi<R> {
    /// `service` is the name the resource service was started with.
    pub fn new(ctx: Arc<CoreContext>, service: &str) -> Self {
        Self {
            api: EntityApi::new(ctx),
            topic: topic::service(service),
        }
    }

    pub fn entities(&self) -> &EntityApi<R> {
        &self.api
    }

    fn post(&self, event: &ServiceEvent) -> Result<(), CoreError> {
        debug!(topic = %self.topic, command = %event.command, id = %event.id, "posting service command");
        self.api.context().bus.publish(&self.topic, event)
    }

    fn command(&self, command: ServiceCommand, id: &str) -> Result<(), CoreError> {
        self.post(&ServiceEvent::new(R::COLLECTION, command, id))
    }

    pub async fn enable(&self, ids: &[String]) -> Result<(), CoreError> {
        for id in ids {
            let mut resource = self.api.get_by_id(id).await?;
            if !resource.enabled() {
                resource.set_enabled(true);
                resource = self.api.save(resource).await?;
            }
            self.post(
                &ServiceEvent::new(R::COLLECTION, ServiceCommand::Add, id.as_str())
                    .with_data(serde_json::to_value(&resource)?),
            )?;
        }
        Ok(())
    }

    pub async fn disable(&self, ids: &[String]) -> Result<(), CoreError> {
        for id in ids {
            let mut resource = self.api.get_by_id(id).await?;
            if resource.enabled() {
                resource.set_enabled(false);
                self.api.save(resource).await?;
            }
            self.command(ServiceCommand::Remove, id)?;
        }
        Ok(())
    }

    pub fn reload(&self, ids: &[String]) -> Result<(), CoreError> {
        for id in ids {
            self.command(ServiceCommand::Reload, id)?;
        }
        Ok(())
    }

    /// Reset the state, save, then reload.
    pub async fn save_and_reload(&self, mut resource: R) -> Result<R, CoreError> {
        resource.set_state(State::default());
        let saved = self.api.save(resource).await?;
        self.command(ServiceCommand::Reload, saved.id())?;
        Ok(saved)
    }

    /// Stop the workers, then delete the rows.
    pub async fn delete(&self, ids: &[String]) -> Result<u64, CoreError> {
        for id in ids {
            self.command(ServiceCommand::Remove, id)?;
        }
        self.api.delete(ids).await
    }

    pub fn load_all(&self) -> Result<(), CoreError> {
        self.command(ServiceCommand::LoadAll, "")
    }

    pub fn unload_all(&self) -> Result<(), CoreError> {
        self.command(ServiceCommand::UnloadAll, "")
    }
}
