// ── Node-state verifier ──
//
// Marks nodes that have been silent for longer than the inactive duration
// as down. Marked nodes drop out of the query, so every page is read at
// offset zero.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

use crate::api::EntityApi;
use crate::context::CoreContext;
use crate::error::CoreError;
use crate::model::{Node, State, Status};
use crate::storage::{Filter, Operator, Pagination};

const PAGE_SIZE: i64 = 50;

/// Returns how many nodes were marked down.
pub async fn verify_node_state(
    ctx: &Arc<CoreContext>,
    inactive: Duration,
    now: DateTime<Utc>,
) -> Result<usize, CoreError> {
    let inactive = TimeDelta::from_std(inactive)
        .map_err(|e| CoreError::validation(format!("inactive duration: {e}")))?;
    let cutoff = (now - inactive).to_rfc3339();
    let filters = [
        Filter::new("state.status", Operator::Ne, Status::Down.to_string()),
        Filter::new("lastSeen", Operator::Lt, cutoff),
    ];

    let api = EntityApi::<Node>::new(Arc::clone(ctx));
    let mut marked = 0;
    loop {
        let page = api.list(&filters, &Pagination::page(PAGE_SIZE, 0)).await?;
        let fetched = page.data.len();
        let mut progressed = 0;
        for mut node in page.data {
            debug!(node = %node.id, last_seen = ?node.last_seen, "node inactive");
            node.state = State {
                status: Status::Down,
                message: "no activity".into(),
                since: Some(now),
            };
            api.save(node).await?;
            progressed += 1;
        }
        marked += progressed;
        if (fetched as u64) < PAGE_SIZE.unsigned_abs() || progressed == 0 {
            break;
        }
    }

    if marked > 0 {
        info!(marked, "inactive nodes marked down");
    }
    Ok(marked)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::context::test_support::context;

    fn node(id: &str, last_seen: Option<DateTime<Utc>>, status: Status) -> Node {
        Node {
            id: id.into(),
            gateway_id: "gw".into(),
            last_seen,
            state: State {
                status,
                ..State::default()
            },
            ..Node::default()
        }
    }

    #[tokio::test]
    async fn stale_nodes_are_marked_down() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let api = EntityApi::<Node>::new(Arc::clone(&ctx));
        let now = Utc::now();

        api.save(node("fresh", Some(now - TimeDelta::minutes(1)), Status::Up))
            .await
            .unwrap();
        api.save(node("stale", Some(now - TimeDelta::hours(1)), Status::Up))
            .await
            .unwrap();
        api.save(node("never", None, Status::Unknown)).await.unwrap();

        let marked = verify_node_state(&ctx, Duration::from_secs(15 * 60), now)
            .await
            .unwrap();
        assert_eq!(marked, 1);
        assert_eq!(api.get_by_id("stale").await.unwrap().state.status, Status::Down);
        assert_eq!(api.get_by_id("fresh").await.unwrap().state.status, Status::Up);

        // Already down: nothing to do on the next run.
        assert_eq!(
            verify_node_state(&ctx, Duration::from_secs(15 * 60), now)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn pages_through_many_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let api = EntityApi::<Node>::new(Arc::clone(&ctx));
        let now = Utc::now();
        for i in 0..120 {
            api.save(node(&format!("n{i:03}"), Some(now - TimeDelta::days(1)), Status::Up))
                .await
                .unwrap();
        }

        let marked = verify_node_state(&ctx, Duration::from_secs(60), now)
            .await
            .unwrap();
        assert_eq!(marked, 120);
    }
}
