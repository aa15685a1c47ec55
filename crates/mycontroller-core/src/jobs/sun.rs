// ── Sunrise/sunset refresher ──
//
// Sun-based schedules compute their fire time once per load, so they are
// reloaded daily to pick up the new sunrise and sunset.

use std::sync::Arc;

use tracing::info;

use crate::context::CoreContext;
use crate::error::CoreError;
use crate::model::{SCHEDULE_TYPE_SUNRISE, SCHEDULE_TYPE_SUNSET, Schedule};
use crate::service::{ResourceApi, service_name};
use crate::storage::{Filter, Operator, Pagination};

const PAGE_SIZE: i64 = 50;

/// Posts a reload for every enabled sunrise/sunset schedule. Returns how
/// many were reloaded.
pub async fn refresh_sun_schedules(ctx: &Arc<CoreContext>) -> Result<usize, CoreError> {
    let api = ResourceApi::<Schedule>::new(Arc::clone(ctx), service_name::SCHEDULE);
    let filters = [
        Filter::eq("enabled", true),
        Filter::new(
            "type",
            Operator::In,
            serde_json::json!([SCHEDULE_TYPE_SUNRISE, SCHEDULE_TYPE_SUNSET]),
        ),
    ];

    let mut offset = 0;
    let mut reloaded = 0;
    loop {
        let page = api
            .entities()
            .list(&filters, &Pagination::page(PAGE_SIZE, offset))
            .await?;
        let ids: Vec<String> = page.data.into_iter().map(|s| s.id).collect();
        api.reload(&ids)?;
        reloaded += ids.len();

        offset += PAGE_SIZE;
        if page.count <= offset.unsigned_abs() || ids.is_empty() {
            break;
        }
    }

    info!(reloaded, "sunrise/sunset schedules reloaded");
    Ok(reloaded)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::api::EntityApi;
    use crate::bus::topic;
    use crate::context::test_support::context;
    use crate::service::{ServiceCommand, ServiceEvent};
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn reloads_only_enabled_sun_schedules() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let schedules = EntityApi::<Schedule>::new(Arc::clone(&ctx));

        for i in 0..60 {
            schedules
                .save(Schedule {
                    id: format!("sun{i:02}"),
                    enabled: true,
                    schedule_type: if i % 2 == 0 {
                        SCHEDULE_TYPE_SUNRISE.into()
                    } else {
                        SCHEDULE_TYPE_SUNSET.into()
                    },
                    ..Schedule::default()
                })
                .await
                .unwrap();
        }
        schedules
            .save(Schedule {
                id: "cron".into(),
                enabled: true,
                schedule_type: "cron".into(),
                ..Schedule::default()
            })
            .await
            .unwrap();
        schedules
            .save(Schedule {
                id: "off".into(),
                enabled: false,
                schedule_type: SCHEDULE_TYPE_SUNSET.into(),
                ..Schedule::default()
            })
            .await
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        ctx.bus.subscribe(&topic::service(service_name::SCHEDULE), move |msg| {
            let sink = Arc::clone(&sink);
            async move {
                let event: ServiceEvent = msg.decode().unwrap();
                assert_eq!(event.command, ServiceCommand::Reload);
                sink.lock().unwrap().push(event.id);
            }
        });

        assert_eq!(refresh_sun_schedules(&ctx).await.unwrap(), 60);
        for _ in 0..100 {
            if seen.lock().unwrap().len() == 60 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 60);
        assert!(!seen.iter().any(|id| id == "cron" || id == "off"));
    }
}
