// ── Forward payload ──
//
// Mirrors field values: whenever a field is created or updated, every
// enabled forward-payload rule whose source is that field copies the new
// value into its destination field. A destination that already holds the
// value is left alone, which also stops A→B→A rules from ping-ponging.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::api::EntityApi;
use crate::bus::topic;
use crate::context::CoreContext;
use crate::error::CoreError;
use crate::model::{Collection, Event, EventType, Field, ForwardPayload};
use crate::storage::{Filter, Pagination};

pub struct ForwardEngine {
    ctx: Arc<CoreContext>,
    subscription: u64,
}

impl ForwardEngine {
    pub fn start(ctx: Arc<CoreContext>) -> Self {
        let handler_ctx = Arc::clone(&ctx);
        let subscription = ctx.bus.subscribe(&topic::event(Collection::Field), move |msg| {
            let ctx = Arc::clone(&handler_ctx);
            async move {
                let event = match msg.decode::<Event>() {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(topic = %msg.topic, error = %e, "undecodable field event");
                        return;
                    }
                };
                if event.event_type == EventType::Deleted {
                    return;
                }
                let field: Field = match event.entity_as() {
                    Ok(field) => field,
                    Err(e) => {
                        warn!(error = %e, "field event without a field");
                        return;
                    }
                };
                if let Err(e) = forward(&ctx, &field).await {
                    warn!(field = %field.id, error = %e, "forward payload failed");
                }
            }
        });
        info!("forward payload engine started");
        Self { ctx, subscription }
    }

    pub fn stop(self) {
        self.ctx
            .bus
            .unsubscribe(&topic::event(Collection::Field), self.subscription);
    }
}

/// Apply every matching rule for `source`. Returns how many destination
/// fields were written.
pub async fn forward(ctx: &Arc<CoreContext>, source: &Field) -> Result<usize, CoreError> {
    let rules = EntityApi::<ForwardPayload>::new(Arc::clone(ctx))
        .list(
            &[
                Filter::eq("enabled", true),
                Filter::eq("srcFieldId", source.id.as_str()),
            ],
            &Pagination::unbounded(),
        )
        .await?;

    let fields = EntityApi::<Field>::new(Arc::clone(ctx));
    let mut written = 0;
    for rule in rules.data {
        if rule.dst_field_id.is_empty() || rule.dst_field_id == source.id {
            continue;
        }
        let mut destination = match fields.get_by_id(&rule.dst_field_id).await {
            Ok(field) => field,
            Err(e) if e.is_not_found() => {
                debug!(rule = %rule.id, dst = %rule.dst_field_id, "destination field missing");
                continue;
            }
            Err(e) => return Err(e),
        };
        if destination.current.value == source.current.value {
            continue;
        }
        destination.record(source.current.value.clone(), Utc::now());
        fields.save(destination).await?;
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::context::test_support::context;
    use serde_json::json;
    use std::time::Duration;

    fn field(id: &str, value: serde_json::Value) -> Field {
        let mut field = Field {
            id: id.into(),
            ..Field::default()
        };
        field.record(value, Utc::now());
        field
    }

    async fn rule(ctx: &Arc<CoreContext>, id: &str, src: &str, dst: &str, enabled: bool) {
        EntityApi::<ForwardPayload>::new(Arc::clone(ctx))
            .save(ForwardPayload {
                id: id.into(),
                enabled,
                src_field_id: src.into(),
                dst_field_id: dst.into(),
                ..ForwardPayload::default()
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn copies_value_to_enabled_destinations() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let fields = EntityApi::<Field>::new(Arc::clone(&ctx));
        for id in ["dst1", "dst2", "dst3"] {
            fields.save(field(id, json!(0))).await.unwrap();
        }
        rule(&ctx, "r1", "src", "dst1", true).await;
        rule(&ctx, "r2", "src", "dst2", false).await;
        rule(&ctx, "r3", "src", "src", true).await;
        rule(&ctx, "r4", "src", "missing", true).await;

        let written = forward(&ctx, &field("src", json!(21.5))).await.unwrap();
        assert_eq!(written, 1);
        let dst1 = fields.get_by_id("dst1").await.unwrap();
        assert_eq!(dst1.current.value, json!(21.5));
        assert_eq!(dst1.previous.value, json!(0));
        assert_eq!(fields.get_by_id("dst2").await.unwrap().current.value, json!(0));
    }

    #[tokio::test]
    async fn engine_follows_field_events_without_looping() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let fields = EntityApi::<Field>::new(Arc::clone(&ctx));
        fields.save(field("a", json!("off"))).await.unwrap();
        fields.save(field("b", json!("off"))).await.unwrap();
        rule(&ctx, "ab", "a", "b", true).await;
        rule(&ctx, "ba", "b", "a", true).await;

        let engine = ForwardEngine::start(Arc::clone(&ctx));
        let mut a = fields.get_by_id("a").await.unwrap();
        a.record(json!("on"), Utc::now());
        fields.save(a).await.unwrap();

        for _ in 0..200 {
            if fields.get_by_id("b").await.unwrap().current.value == json!("on") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(fields.get_by_id("b").await.unwrap().current.value, json!("on"));

        // b's update forwards back to a, which already holds the value.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let a = fields.get_by_id("a").await.unwrap();
        assert_eq!(a.current.value, json!("on"));
        assert_eq!(a.previous.value, json!("off"));
        engine.stop();
    }
}
