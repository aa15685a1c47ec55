// ── System jobs ──
//
// Built-in periodic jobs on a shared named scheduler: node-state
// verification, the daily sunrise/sunset refresh and the anonymous
// analytics report. Job parameters come from the core config, overridden
// by the `system` settings document; a reload message on
// `internal.system_jobs` re-registers them.

mod analytics;
mod cron;
mod node_state;
mod scheduler;
mod sun;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

pub use analytics::{
    ANALYTICS_ID, API_VERSION, AnalyticsPayload, AnalyticsReporter, random_daily_schedule,
};
pub use cron::{CronError, CronSchedule};
pub use node_state::verify_node_state;
pub use scheduler::{JobFn, Scheduler};
pub use sun::refresh_sun_schedules;

use crate::api::EntityApi;
use crate::bus::{SystemJobsReload, topic};
use crate::config::SystemJobsConfig;
use crate::context::CoreContext;
use crate::error::CoreError;
use crate::model::{Settings, settings_key};

/// Scheduler names of the built-in jobs.
pub mod job_name {
    pub const PREFIX: &str = "system_";
    pub const NODE_STATE: &str = "system_node_state_verifier";
    pub const SUN_REFRESH: &str = "system_sunrise_sunset_refresh";
    pub const ANALYTICS: &str = "system_analytics_reporter";
}

// ── Settings overrides ──────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct NodeStateOverride {
    enabled: Option<bool>,
    execution_interval: Option<String>,
    inactive_duration: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SystemJobsOverride {
    node_state_job: NodeStateOverride,
    sunrise_job_cron: Option<String>,
    analytics_enabled: Option<bool>,
}

fn parse_duration(field: &str, text: &str) -> Result<Duration, CoreError> {
    humantime::parse_duration(text.trim())
        .map_err(|e| CoreError::validation(format!("{field}: {e}")))
}

/// Config defaults with the `system` settings document applied on top.
/// Analytics can be switched off by settings but never forced on when
/// the config disables it.
pub async fn effective_config(ctx: &Arc<CoreContext>) -> Result<SystemJobsConfig, CoreError> {
    let mut config = ctx.config.jobs.clone();
    let settings = match EntityApi::<Settings>::new(Arc::clone(ctx))
        .get_by_id(settings_key::SYSTEM)
        .await
    {
        Ok(settings) => settings,
        Err(e) if e.is_not_found() => return Ok(config),
        Err(e) => return Err(e),
    };
    if settings.spec.is_null() {
        return Ok(config);
    }
    let overrides: SystemJobsOverride = serde_json::from_value(settings.spec)?;

    if let Some(enabled) = overrides.node_state_job.enabled {
        config.node_state.enabled = enabled;
    }
    if let Some(text) = &overrides.node_state_job.execution_interval {
        config.node_state.execution_interval = parse_duration("executionInterval", text)?;
    }
    if let Some(text) = &overrides.node_state_job.inactive_duration {
        config.node_state.inactive_duration = parse_duration("inactiveDuration", text)?;
    }
    if let Some(cron) = overrides.sunrise_job_cron {
        config.sun_refresh_cron = cron;
    }
    if overrides.analytics_enabled == Some(false) {
        config.analytics.enabled = false;
    }
    Ok(config)
}

// ── Registration ────────────────────────────────────────────────────

/// Remove then add every built-in job from the current configuration.
pub async fn register(ctx: &Arc<CoreContext>, scheduler: &Scheduler) -> Result<(), CoreError> {
    let config = effective_config(ctx).await?;
    scheduler.remove_prefix(job_name::PREFIX);

    if config.node_state.enabled && !config.node_state.execution_interval.is_zero() {
        let job_ctx = Arc::clone(ctx);
        let inactive = config.node_state.inactive_duration;
        scheduler.add(
            job_name::NODE_STATE,
            CronSchedule::every(config.node_state.execution_interval),
            move || {
                let ctx = Arc::clone(&job_ctx);
                async move {
                    if let Err(e) = verify_node_state(&ctx, inactive, Utc::now()).await {
                        warn!(error = %e, "node-state verification failed");
                    }
                }
            },
        );
    }

    let sun_ctx = Arc::clone(ctx);
    scheduler
        .add_expr(job_name::SUN_REFRESH, &config.sun_refresh_cron, move || {
            let ctx = Arc::clone(&sun_ctx);
            async move {
                if let Err(e) = refresh_sun_schedules(&ctx).await {
                    warn!(error = %e, "sunrise/sunset refresh failed");
                }
            }
        })
        .map_err(|e| CoreError::validation(e.to_string()))?;

    if config.analytics.enabled {
        let reporter = Arc::new(AnalyticsReporter::new(config.analytics.endpoint.clone()));
        let analytics_ctx = Arc::clone(ctx);
        scheduler.add(job_name::ANALYTICS, random_daily_schedule(), move || {
            let ctx = Arc::clone(&analytics_ctx);
            let reporter = Arc::clone(&reporter);
            async move {
                if let Err(e) = reporter.report(&ctx).await {
                    debug!(error = %e, "analytics report failed");
                }
            }
        });
    }

    info!(jobs = ?scheduler.names(), "system jobs registered");
    Ok(())
}

/// The running system-job set plus its reload subscription.
pub struct SystemJobs {
    ctx: Arc<CoreContext>,
    scheduler: Arc<Scheduler>,
    subscription: u64,
}

impl SystemJobs {
    /// Register the jobs and start listening for reload requests.
    pub async fn start(
        ctx: Arc<CoreContext>,
        scheduler: Arc<Scheduler>,
    ) -> Result<Self, CoreError> {
        register(&ctx, &scheduler).await?;

        let reload_ctx = Arc::clone(&ctx);
        let reload_scheduler = Arc::clone(&scheduler);
        let subscription = ctx.bus.subscribe(topic::SYSTEM_JOBS, move |message| {
            let ctx = Arc::clone(&reload_ctx);
            let scheduler = Arc::clone(&reload_scheduler);
            async move {
                if message.decode::<SystemJobsReload>().is_err() {
                    debug!(type_tag = %message.type_tag, "ignoring non-reload message");
                    return;
                }
                if let Err(e) = register(&ctx, &scheduler).await {
                    warn!(error = %e, "system jobs reload failed");
                }
            }
        });

        Ok(Self {
            ctx,
            scheduler,
            subscription,
        })
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Ask every running instance to re-read its configuration.
    pub fn request_reload(ctx: &CoreContext) -> Result<(), CoreError> {
        ctx.bus.publish(topic::SYSTEM_JOBS, &SystemJobsReload)
    }

    pub fn stop(self) {
        self.ctx.bus.unsubscribe(topic::SYSTEM_JOBS, self.subscription);
        self.scheduler.remove_prefix(job_name::PREFIX);
    }
}
