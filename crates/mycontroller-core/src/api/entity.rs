// ── Typed entity access ──
//
// `EntityApi<T>` is the only writer of entity rows. It assigns ids,
// stamps `modifiedOn` unless the process flag says otherwise, and posts
// one event per created, updated or deleted row.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::BackupApi;
use crate::context::CoreContext;
use crate::error::CoreError;
use crate::model::{Collection, Entity, Event, EventType, ManagedResource, State};
use crate::storage::{Filter, FindResult, Pagination, StorageError, document_id};

pub struct EntityApi<T> {
    ctx: Arc<CoreContext>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for EntityApi<T> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            _entity: PhantomData,
        }
    }
}

fn decode<T: Entity>(document: Value) -> Result<T, CoreError> {
    serde_json::from_value(document).map_err(|e| {
        CoreError::Serialization(format!("decoding {}: {e}", T::COLLECTION))
    })
}

impl<T: Entity> EntityApi<T> {
    pub fn new(ctx: Arc<CoreContext>) -> Self {
        Self {
            ctx,
            _entity: PhantomData,
        }
    }

    pub fn context(&self) -> &Arc<CoreContext> {
        &self.ctx
    }

    // ── Reads ────────────────────────────────────────────────────

    pub async fn list(
        &self,
        filters: &[Filter],
        pagination: &Pagination,
    ) -> Result<FindResult<T>, CoreError> {
        let page = self
            .ctx
            .storage
            .find(T::COLLECTION, filters, pagination)
            .await?;
        let data = page
            .data
            .into_iter()
            .map(decode::<T>)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FindResult {
            count: page.count,
            limit: page.limit,
            offset: page.offset,
            data,
        })
    }

    pub async fn get(&self, filters: &[Filter]) -> Result<T, CoreError> {
        let document = self.ctx.storage.find_one(T::COLLECTION, filters).await?;
        decode(document)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<T, CoreError> {
        if id.is_empty() {
            return Err(CoreError::validation("id must not be empty"));
        }
        self.get(&[Filter::eq("id", id)]).await.map_err(|e| {
            if e.is_not_found() {
                CoreError::NotFound {
                    entity_type: T::COLLECTION.to_string(),
                    identifier: id.to_owned(),
                }
            } else {
                e
            }
        })
    }

    async fn find_document(&self, id: &str) -> Result<Option<Value>, CoreError> {
        match self
            .ctx
            .storage
            .find_one(T::COLLECTION, &[Filter::eq("id", id)])
            .await
        {
            Ok(document) => Ok(Some(document)),
            Err(StorageError::NoDocuments { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_existing(&self, id: &str) -> Result<Option<T>, CoreError> {
        self.find_document(id).await?.map(decode::<T>).transpose()
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Insert or replace. An empty id gets a fresh UUID.
    pub async fn save(&self, mut entity: T) -> Result<T, CoreError> {
        if entity.id().is_empty() {
            entity.set_id(Uuid::new_v4().to_string());
        }
        let _row = self.ctx.lock_row(T::COLLECTION, entity.id()).await;
        let existing = self.find_existing(entity.id()).await?;

        if !self.ctx.is_modified_on_paused() {
            let mut now = Utc::now();
            // Keep modifiedOn strictly increasing across wall-clock steps.
            if let Some(previous) = existing.as_ref().and_then(Entity::modified_on) {
                if previous >= now {
                    now = previous + TimeDelta::milliseconds(1);
                }
            }
            entity.set_modified_on(now);
        }

        let document = serde_json::to_value(&entity)?;
        self.ctx
            .storage
            .upsert(T::COLLECTION, document.clone(), &[])
            .await?;

        let event_type = if existing.is_some() {
            EventType::Updated
        } else {
            EventType::Created
        };
        self.emit(event_type, document);
        Ok(entity)
    }

    /// Write without stamping or events. Used by restore and startup import.
    pub async fn import(&self, entity: T) -> Result<(), CoreError> {
        if entity.id().is_empty() {
            return Err(CoreError::validation(format!(
                "cannot import {} without id",
                T::COLLECTION
            )));
        }
        let document = serde_json::to_value(&entity)?;
        self.ctx
            .storage
            .upsert(T::COLLECTION, document, &[])
            .await?;
        Ok(())
    }

    pub async fn delete(&self, ids: &[String]) -> Result<u64, CoreError> {
        if ids.is_empty() || ids.iter().any(String::is_empty) {
            return Err(CoreError::validation("ids must not be empty"));
        }
        self.delete_by_filter(&[Filter::ids(ids.iter().cloned())])
            .await
    }

    /// Delete every match and post one `deleted` event per removed row.
    pub async fn delete_by_filter(&self, filters: &[Filter]) -> Result<u64, CoreError> {
        if filters.is_empty() {
            return Err(CoreError::validation("delete requires at least one filter"));
        }
        let matched = self
            .ctx
            .storage
            .find(T::COLLECTION, filters, &Pagination::unbounded())
            .await?;
        if matched.data.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = matched
            .data
            .iter()
            .filter_map(|d| document_id(d).map(str::to_owned))
            .collect();
        let deleted = self
            .ctx
            .storage
            .delete(T::COLLECTION, &[Filter::ids(ids)])
            .await?;

        for document in matched.data {
            if let Some(id) = document_id(&document) {
                self.ctx.forget_row(T::COLLECTION, id);
            }
            self.emit(EventType::Deleted, document);
        }
        debug!(collection = %T::COLLECTION, deleted, "entities deleted");
        Ok(deleted)
    }

    fn emit(&self, event_type: EventType, entity: Value) {
        let event = Event::new(T::COLLECTION, event_type, entity);
        if let Err(e) = self.ctx.bus.post_event(&event) {
            warn!(collection = %T::COLLECTION, %event_type, error = %e, "failed to post event");
        }
    }
}

impl<T: ManagedResource> EntityApi<T> {
    /// Persist a new state without touching `modifiedOn`.
    ///
    /// Only the stored `state` field changes, under the same row lock as
    /// [`EntityApi::save`], so a concurrent configuration save is never
    /// reverted.
    pub async fn set_state(&self, id: &str, state: State) -> Result<(), CoreError> {
        if id.is_empty() {
            return Err(CoreError::validation("id must not be empty"));
        }
        let _row = self.ctx.lock_row(T::COLLECTION, id).await;
        let Some(mut document) = self.find_document(id).await? else {
            return Err(CoreError::NotFound {
                entity_type: T::COLLECTION.to_string(),
                identifier: id.to_owned(),
            });
        };
        if let Some(map) = document.as_object_mut() {
            map.insert("state".into(), serde_json::to_value(&state)?);
        }
        let updated = self
            .ctx
            .storage
            .update(T::COLLECTION, document.clone(), &[Filter::eq("id", id)])
            .await?;
        if updated > 0 {
            self.emit(EventType::Updated, document);
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Entity> BackupApi for EntityApi<T> {
    fn collection(&self) -> Collection {
        T::COLLECTION
    }

    async fn export_page(&self, pagination: &Pagination) -> Result<FindResult, CoreError> {
        Ok(self
            .ctx
            .storage
            .find(T::COLLECTION, &[], pagination)
            .await?)
    }

    async fn import_rows(&self, rows: Vec<Value>) -> Result<usize, CoreError> {
        let entities: Vec<T> = serde_json::from_value(Value::Array(rows)).map_err(|e| {
            CoreError::Serialization(format!("decoding {} rows: {e}", T::COLLECTION))
        })?;
        let total = entities.len();
        for entity in entities {
            self.import(entity).await?;
        }
        Ok(total)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::bus::topic;
    use crate::context::test_support;
    use crate::model::{Gateway, Node, Status};
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    fn event_sink(ctx: &CoreContext) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        ctx.bus.subscribe(topic::ALL_EVENTS, move |msg| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(msg.decode::<Event>().unwrap());
            }
        });
        rx
    }

    #[tokio::test]
    async fn save_assigns_id_and_stamps_modified_on() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_support::context(dir.path());
        let mut events = event_sink(&ctx);
        let api = EntityApi::<Node>::new(Arc::clone(&ctx));

        let saved = api.save(Node::default()).await.unwrap();
        assert!(!saved.id.is_empty());
        assert!(saved.modified_on.is_some());

        let event = events.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::Created);
        assert_eq!(event.entity_str("id"), Some(saved.id.as_str()));

        let again = api.save(saved.clone()).await.unwrap();
        assert!(again.modified_on > saved.modified_on);
        assert_eq!(events.recv().await.unwrap().event_type, EventType::Updated);
    }

    #[tokio::test]
    async fn paused_modified_on_keeps_carried_value() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_support::context(dir.path());
        let api = EntityApi::<Node>::new(Arc::clone(&ctx));
        let stamp = "2020-05-01T10:00:00Z".parse().unwrap();

        let _paused = ctx.pause_modified_on();
        let node = Node {
            id: "gw1.n1".into(),
            modified_on: Some(stamp),
            ..Node::default()
        };
        api.save(node).await.unwrap();
        assert_eq!(api.get_by_id("gw1.n1").await.unwrap().modified_on, Some(stamp));
    }

    #[tokio::test]
    async fn get_by_id_maps_missing_to_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_support::context(dir.path());
        let api = EntityApi::<Node>::new(ctx);
        let err = api.get_by_id("nope").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
        assert_eq!(err.status_code(), 404);
        assert!(matches!(
            api.get_by_id("").await.unwrap_err(),
            CoreError::ValidationFailed { .. }
        ));
    }

    #[tokio::test]
    async fn delete_posts_one_event_per_row() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_support::context(dir.path());
        let api = EntityApi::<Node>::new(Arc::clone(&ctx));
        for id in ["a", "b", "c"] {
            api.save(Node {
                id: id.into(),
                gateway_id: "gw1".into(),
                ..Node::default()
            })
            .await
            .unwrap();
        }
        let mut events = event_sink(&ctx);

        let deleted = api
            .delete_by_filter(&[Filter::eq("gatewayId", "gw1")])
            .await
            .unwrap();
        assert_eq!(deleted, 3);
        for _ in 0..3 {
            assert_eq!(events.recv().await.unwrap().event_type, EventType::Deleted);
        }
        assert!(api.delete_by_filter(&[]).await.is_err());
    }

    #[tokio::test]
    async fn import_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_support::context(dir.path());
        let mut events = event_sink(&ctx);
        let api = EntityApi::<Node>::new(Arc::clone(&ctx));

        api.import(Node {
            id: "x".into(),
            ..Node::default()
        })
        .await
        .unwrap();
        assert_eq!(api.get_by_id("x").await.unwrap().modified_on, None);
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(50), events.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn set_state_keeps_modified_on() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_support::context(dir.path());
        let api = EntityApi::<Gateway>::new(ctx);
        let saved = api
            .save(Gateway {
                id: "gw1".into(),
                ..Gateway::default()
            })
            .await
            .unwrap();

        api.set_state("gw1", State::up("connected")).await.unwrap();
        let gw = api.get_by_id("gw1").await.unwrap();
        assert_eq!(gw.state.status, Status::Up);
        assert_eq!(gw.modified_on, saved.modified_on);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn set_state_never_reverts_concurrent_save() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_support::context(dir.path());
        let api = EntityApi::<Gateway>::new(ctx);
        api.save(Gateway {
            id: "gw1".into(),
            ..Gateway::default()
        })
        .await
        .unwrap();

        for round in 0..25 {
            let description = format!("config {round}");
            let edited = Gateway {
                id: "gw1".into(),
                description: description.clone(),
                state: State::up("connected"),
                ..Gateway::default()
            };
            let saver = {
                let api = api.clone();
                tokio::spawn(async move { api.save(edited).await })
            };
            let reporter = {
                let api = api.clone();
                tokio::spawn(async move { api.set_state("gw1", State::up("connected")).await })
            };
            let saved = saver.await.unwrap().unwrap();
            reporter.await.unwrap().unwrap();

            let stored = api.get_by_id("gw1").await.unwrap();
            assert_eq!(stored.description, description);
            assert_eq!(stored.modified_on, saved.modified_on);
            assert_eq!(stored.state.status, Status::Up);
        }

        // The stored configuration is kept when only the state changes.
        api.set_state("gw1", State::error("lost")).await.unwrap();
        let stored = api.get_by_id("gw1").await.unwrap();
        assert_eq!(stored.description, "config 24");
        assert_eq!(stored.state.status, Status::Error);
        assert!(api.set_state("nope", State::up("x")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn import_rows_decodes_typed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_support::context(dir.path());
        let api = EntityApi::<Node>::new(Arc::clone(&ctx));
        let rows = vec![
            serde_json::json!({"id": "n1", "gatewayId": "gw1"}),
            serde_json::json!({"id": "n2", "gatewayId": "gw1"}),
        ];
        assert_eq!(api.import_rows(rows).await.unwrap(), 2);
        let page = api.list(&[], &Pagination::unbounded()).await.unwrap();
        assert_eq!(page.count, 2);
        assert_eq!(page.data[1].id, "n2");
    }
}
