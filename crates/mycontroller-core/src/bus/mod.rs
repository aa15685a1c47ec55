// ── In-process message bus ──
//
// Topic-based publish/subscribe. Every subscriber owns a bounded FIFO
// and a single worker task, so delivery is ordered per subscriber and a
// slow or failing subscriber never blocks the others. Publication can be
// paused (restore); paused publishes are discarded, never replayed.

mod queue;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

pub(crate) use queue::{BoundedQueue, Overflow, Pushed};

use crate::error::CoreError;
use crate::model::{Collection, Event};

/// Default per-subscriber queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

// ── Topics ──────────────────────────────────────────────────────────

/// Topic names defined by the core.
pub mod topic {
    use crate::model::Collection;

    /// Matches every entity event topic.
    pub const ALL_EVENTS: &str = "event.>";
    pub const SYSTEM_JOBS: &str = "internal.system_jobs";
    pub const SHUTDOWN: &str = "internal.shutdown";

    pub fn event(collection: Collection) -> String {
        format!("event.{collection}")
    }

    pub fn service(name: &str) -> String {
        format!("service.{name}")
    }
}

fn topic_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix('>') {
        Some(prefix) => topic.starts_with(prefix),
        None => pattern == topic,
    }
}

// ── Payloads ────────────────────────────────────────────────────────

/// A type that can travel on the bus. The tag is checked on decode.
pub trait BusPayload: Serialize + DeserializeOwned + Send + 'static {
    const TYPE_TAG: &'static str;
}

impl BusPayload for Event {
    const TYPE_TAG: &'static str = "event";
}

impl BusPayload for serde_json::Value {
    const TYPE_TAG: &'static str = "json";
}

/// Ask the host process to shut down in an orderly fashion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShutdownRequest {
    #[serde(default)]
    pub reason: String,
}

impl BusPayload for ShutdownRequest {
    const TYPE_TAG: &'static str = "shutdown_request";
}

/// Ask the system-jobs scheduler to rebuild its job set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemJobsReload;

impl BusPayload for SystemJobsReload {
    const TYPE_TAG: &'static str = "system_jobs_reload";
}

/// An encoded message as delivered to subscribers.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub type_tag: &'static str,
    pub payload: Bytes,
}

impl Message {
    pub fn encode<T: BusPayload>(topic: &str, data: &T) -> Result<Self, CoreError> {
        let payload = serde_json::to_vec(data)?;
        Ok(Self {
            topic: topic.to_owned(),
            type_tag: T::TYPE_TAG,
            payload: Bytes::from(payload),
        })
    }

    pub fn decode<T: BusPayload>(&self) -> Result<T, CoreError> {
        if self.type_tag != T::TYPE_TAG {
            return Err(CoreError::Serialization(format!(
                "message on '{}' carries '{}', expected '{}'",
                self.topic,
                self.type_tag,
                T::TYPE_TAG
            )));
        }
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

// ── Bus ─────────────────────────────────────────────────────────────

/// Subscriber callback. Runs on the subscriber's own worker task.
pub type HandlerFn = Arc<dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync>;

struct Subscription {
    id: u64,
    queue: Arc<BoundedQueue<Message>>,
}

/// Cheaply cloneable handle to the process bus.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

struct BusInner {
    /// Pattern -> subscribers, in subscription order.
    subscriptions: DashMap<String, Vec<Subscription>>,
    next_id: AtomicU64,
    paused: AtomicBool,
    queue_capacity: usize,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl Bus {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscriptions: DashMap::new(),
                next_id: AtomicU64::new(1),
                paused: AtomicBool::new(false),
                queue_capacity: queue_capacity.max(1),
            }),
        }
    }

    // ── Publish side ─────────────────────────────────────────────

    /// Publish `data` on `topic`. Silently succeeds when nobody listens
    /// or when publishing is paused.
    pub fn publish<T: BusPayload>(&self, topic: &str, data: &T) -> Result<(), CoreError> {
        if self.is_paused() {
            trace!(topic, "publish paused, message discarded");
            return Ok(());
        }
        let message = Message::encode(topic, data)?;

        for entry in &self.inner.subscriptions {
            if !topic_matches(entry.key(), topic) {
                continue;
            }
            for sub in entry.value() {
                if sub.queue.push(message.clone()) == Pushed::EvictedOldest {
                    warn!(
                        topic,
                        subscription = sub.id,
                        dropped = sub.queue.dropped(),
                        "subscriber queue full, dropped oldest message"
                    );
                }
            }
        }
        Ok(())
    }

    /// Publish an entity event on `event.<entityType>`.
    pub fn post_event(&self, event: &Event) -> Result<(), CoreError> {
        self.publish(&topic::event(event.entity_type), event)
    }

    pub fn pause_publish(&self) {
        self.inner.paused.store(true, Ordering::Release);
        debug!("bus publish paused");
    }

    pub fn resume_publish(&self) {
        self.inner.paused.store(false, Ordering::Release);
        debug!("bus publish resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    // ── Subscribe side ───────────────────────────────────────────

    /// Subscribe with the default queue depth. `topic` may end in `>`
    /// to match every topic with that prefix.
    pub fn subscribe<F, Fut>(&self, topic: &str, handler: F) -> u64
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe_with_capacity(topic, self.inner.queue_capacity, handler)
    }

    pub fn subscribe_with_capacity<F, Fut>(&self, topic: &str, capacity: usize, handler: F) -> u64
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: HandlerFn = Arc::new(move |msg| Box::pin(handler(msg)));
        self.subscribe_handler(topic, capacity, handler)
    }

    /// Register an already type-erased handler.
    pub fn subscribe_handler(&self, topic: &str, capacity: usize, handler: HandlerFn) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(BoundedQueue::new(capacity, Overflow::DropOldest));

        tokio::spawn(subscriber_task(
            topic.to_owned(),
            id,
            Arc::clone(&queue),
            handler,
        ));

        self.inner
            .subscriptions
            .entry(topic.to_owned())
            .or_default()
            .push(Subscription { id, queue });

        debug!(topic, subscription = id, "subscribed");
        id
    }

    /// Remove a subscription. Queued messages are still delivered.
    pub fn unsubscribe(&self, topic: &str, id: u64) -> bool {
        let mut removed = false;
        if let Some(mut subs) = self.inner.subscriptions.get_mut(topic) {
            if let Some(pos) = subs.iter().position(|s| s.id == id) {
                let sub = subs.remove(pos);
                sub.queue.close();
                removed = true;
            }
        }
        self.inner
            .subscriptions
            .remove_if(topic, |_, subs| subs.is_empty());
        if removed {
            debug!(topic, subscription = id, "unsubscribed");
        }
        removed
    }

    /// Messages discarded for one subscriber because its queue was full.
    pub fn dropped(&self, topic: &str, id: u64) -> Option<u64> {
        let subs = self.inner.subscriptions.get(topic)?;
        subs.iter().find(|s| s.id == id).map(|s| s.queue.dropped())
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .subscriptions
            .get(topic)
            .map_or(0, |subs| subs.len())
    }

    /// Close every subscription. Workers finish their queued messages.
    pub fn close(&self) {
        for entry in &self.inner.subscriptions {
            for sub in entry.value() {
                sub.queue.close();
            }
        }
        self.inner.subscriptions.clear();
    }
}

/// Drain one subscriber's queue, isolating handler panics.
async fn subscriber_task(
    topic: String,
    id: u64,
    queue: Arc<BoundedQueue<Message>>,
    handler: HandlerFn,
) {
    while let Some(message) = queue.pop().await {
        let msg_topic = message.topic.clone();
        let delivery = std::panic::catch_unwind(AssertUnwindSafe(|| handler(message)));
        let outcome = match delivery {
            Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
            Err(panic) => Err(panic),
        };
        if outcome.is_err() {
            warn!(
                topic = %topic,
                message_topic = %msg_topic,
                subscription = id,
                "subscriber panicked while handling message"
            );
        }
    }
    trace!(topic = %topic, subscription = id, "subscriber task finished");
}

/// Subscribe to every entity event of one collection.
pub fn event_topic_for(collection: Collection) -> String {
    topic::event(collection)
}
