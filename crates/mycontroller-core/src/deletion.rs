// ── Cascading deletion ──
//
// Keeps the gateway → node → source → field tree free of orphans. Every
// `deleted` event for a gateway, node or source deletes that entity's
// direct children; their own `deleted` events drive the cascade down.
// Events are buffered in a local queue that drops the newest entry when
// full, drained by a single worker.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::EntityApi;
use crate::bus::{BoundedQueue, Overflow, Pushed, topic};
use crate::context::CoreContext;
use crate::error::CoreError;
use crate::model::{Collection, Entity, Event, EventType, Field, Node, Source};
use crate::storage::{Filter, Pagination, document_id};

pub const QUEUE_DEPTH: usize = 3000;
pub const PAGE_SIZE: i64 = 50;

pub struct DeletionEngine {
    ctx: Arc<CoreContext>,
    queue: Arc<BoundedQueue<Event>>,
    subscription: u64,
    worker: JoinHandle<()>,
}

impl DeletionEngine {
    pub fn start(ctx: Arc<CoreContext>) -> Self {
        let queue = Arc::new(BoundedQueue::new(QUEUE_DEPTH, Overflow::DropNewest));

        let inbox = Arc::clone(&queue);
        let subscription = ctx.bus.subscribe(topic::ALL_EVENTS, move |msg| {
            let inbox = Arc::clone(&inbox);
            async move {
                let event = match msg.decode::<Event>() {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(topic = %msg.topic, error = %e, "undecodable event");
                        return;
                    }
                };
                if !is_cascading(&event) {
                    return;
                }
                if inbox.push(event) == Pushed::Rejected {
                    warn!(
                        dropped = inbox.dropped(),
                        "deletion queue full, dropped newest event"
                    );
                }
            }
        });

        let worker = tokio::spawn(worker_task(Arc::clone(&ctx), Arc::clone(&queue)));
        info!(depth = QUEUE_DEPTH, "deletion engine started");
        Self {
            ctx,
            queue,
            subscription,
            worker,
        }
    }

    /// Events discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    /// Stop listening, finish queued work, then return.
    pub async fn stop(self) {
        self.ctx.bus.unsubscribe(topic::ALL_EVENTS, self.subscription);
        self.queue.close();
        let _ = self.worker.await;
        info!("deletion engine stopped");
    }
}

fn is_cascading(event: &Event) -> bool {
    event.event_type == EventType::Deleted && event.entity_type.child().is_some()
}

async fn worker_task(ctx: Arc<CoreContext>, queue: Arc<BoundedQueue<Event>>) {
    while let Some(event) = queue.pop().await {
        let id = event.entity_str("id").unwrap_or_default().to_owned();
        match cascade(&ctx, &event).await {
            Ok(deleted) => debug!(
                entity_type = %event.entity_type,
                id = %id,
                deleted,
                "children deleted"
            ),
            Err(e) => warn!(
                entity_type = %event.entity_type,
                id = %id,
                error = %e,
                "cascade delete failed"
            ),
        }
    }
}

/// Delete the direct children of the entity carried by `event`.
async fn cascade(ctx: &Arc<CoreContext>, event: &Event) -> Result<u64, CoreError> {
    match event.entity_type {
        Collection::Gateway => {
            let id = event.entity_str("id").unwrap_or_default();
            if id.is_empty() {
                return Ok(0);
            }
            let filters = [Filter::eq("gatewayId", id)];
            delete_children(&EntityApi::<Node>::new(Arc::clone(ctx)), &filters).await
        }
        Collection::Node => {
            let node: Node = event.entity_as()?;
            if node.gateway_id.is_empty() || node.node_id.is_empty() {
                return Ok(0);
            }
            let filters = [
                Filter::eq("gatewayId", node.gateway_id),
                Filter::eq("nodeId", node.node_id),
            ];
            delete_children(&EntityApi::<Source>::new(Arc::clone(ctx)), &filters).await
        }
        Collection::Source => {
            let source: Source = event.entity_as()?;
            if source.gateway_id.is_empty()
                || source.node_id.is_empty()
                || source.source_id.is_empty()
            {
                return Ok(0);
            }
            let filters = [
                Filter::eq("gatewayId", source.gateway_id),
                Filter::eq("nodeId", source.node_id),
                Filter::eq("sourceId", source.source_id),
            ];
            delete_children(&EntityApi::<Field>::new(Arc::clone(ctx)), &filters).await
        }
        _ => Ok(0),
    }
}

/// Delete in pages, re-reading from offset 0 since each batch shifts the
/// remaining set. Stops on a short page or a page that deletes nothing.
async fn delete_children<T: Entity>(
    api: &EntityApi<T>,
    filters: &[Filter],
) -> Result<u64, CoreError> {
    let first_page = Pagination::page(PAGE_SIZE, 0);
    let mut total = 0;
    loop {
        let page = api
            .context()
            .storage
            .find(T::COLLECTION, filters, &first_page)
            .await?;
        let ids: Vec<String> = page
            .data
            .iter()
            .filter_map(|d| document_id(d).map(str::to_owned))
            .collect();
        if ids.is_empty() {
            break;
        }
        let deleted = api.delete(&ids).await?;
        total += deleted;
        if (ids.len() as u64) < PAGE_SIZE.unsigned_abs() || deleted == 0 {
            break;
        }
    }
    Ok(total)
}
