// ── Anonymous usage reporter ──
//
// Once a day, at a random minute between 00:00 and 04:59, posts which
// gateway and handler types are in use. The installation is identified by
// a random id kept in the `analytics` settings document; no names,
// addresses or entity ids leave the process.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::cron::CronSchedule;
use crate::api::EntityApi;
use crate::context::CoreContext;
use crate::error::CoreError;
use crate::model::{Gateway, Handler, ManagedResource, Settings, settings_key};
use crate::storage::{Filter, Pagination};
use crate::version::VersionInfo;

pub const API_VERSION: &str = "1";
pub const ANALYTICS_ID: &str = "mycontroller-server";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsPayload {
    pub api_version: String,
    pub analytics_id: String,
    pub anonymous_user_id: String,
    pub app_version: String,
    pub git_commit: String,
    pub platform: String,
    pub arch: String,
    pub runtime: String,
    pub is_container: bool,
    pub enabled_gateway_types: Vec<String>,
    pub enabled_handler_types: Vec<String>,
}

/// A daily schedule at a random second within 00:00:00–04:59:59.
pub fn random_daily_schedule() -> CronSchedule {
    let mut rng = rand::thread_rng();
    let expr = format!(
        "{} {} {} * * *",
        rng.gen_range(0..60),
        rng.gen_range(0..60),
        rng.gen_range(0..5),
    );
    expr.parse()
        .unwrap_or_else(|_| CronSchedule::every(Duration::from_secs(24 * 60 * 60)))
}

fn is_container() -> bool {
    std::path::Path::new("/.dockerenv").exists() || std::env::var_os("container").is_some()
}

pub struct AnalyticsReporter {
    client: reqwest::Client,
    endpoint: String,
}

impl AnalyticsReporter {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub async fn collect(&self, ctx: &Arc<CoreContext>) -> Result<AnalyticsPayload, CoreError> {
        let version = VersionInfo::current();
        Ok(AnalyticsPayload {
            api_version: API_VERSION.into(),
            analytics_id: ANALYTICS_ID.into(),
            anonymous_user_id: anonymous_id(ctx).await?,
            app_version: version.version,
            git_commit: version.git_commit,
            platform: version.platform,
            arch: version.arch,
            runtime: "rust".into(),
            is_container: is_container(),
            enabled_gateway_types: enabled_types::<Gateway>(ctx).await?,
            enabled_handler_types: enabled_types::<Handler>(ctx).await?,
        })
    }

    pub async fn send(&self, payload: &AnalyticsPayload) -> Result<(), CoreError> {
        debug!(endpoint = %self.endpoint, "sending analytics");
        let response = self
            .client
            .post(&self.endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|e| CoreError::OperationFailed {
                message: format!("analytics request failed: {e}"),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::OperationFailed {
                message: format!("analytics endpoint answered {status}"),
            });
        }
        info!("analytics reported");
        Ok(())
    }

    pub async fn report(&self, ctx: &Arc<CoreContext>) -> Result<(), CoreError> {
        let payload = self.collect(ctx).await?;
        self.send(&payload).await
    }
}

/// Read the installation id, creating it on first use.
async fn anonymous_id(ctx: &Arc<CoreContext>) -> Result<String, CoreError> {
    let api = EntityApi::<Settings>::new(Arc::clone(ctx));
    let mut settings = match api.get_by_id(settings_key::ANALYTICS).await {
        Ok(settings) => settings,
        Err(e) if e.is_not_found() => Settings {
            id: settings_key::ANALYTICS.into(),
            ..Settings::default()
        },
        Err(e) => return Err(e),
    };
    if let Some(id) = settings
        .spec
        .get("anonymousId")
        .and_then(|v| v.as_str())
        .filter(|id| !id.is_empty())
    {
        return Ok(id.to_owned());
    }

    let id = uuid::Uuid::new_v4().to_string();
    settings.spec = serde_json::json!({ "anonymousId": id });
    api.save(settings).await?;
    Ok(id)
}

async fn enabled_types<R: ManagedResource>(
    ctx: &Arc<CoreContext>,
) -> Result<Vec<String>, CoreError> {
    let page = EntityApi::<R>::new(Arc::clone(ctx))
        .list(&[Filter::eq("enabled", true)], &Pagination::unbounded())
        .await?;
    let types: BTreeSet<String> = page
        .data
        .iter()
        .map(|r| r.provider_type().to_owned())
        .filter(|t| !t.is_empty())
        .collect();
    Ok(types.into_iter().collect())
}
