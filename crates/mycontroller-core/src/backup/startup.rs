// ── Boot-time jobs ──
//
// A restore that needs a clean process is deferred: `schedule_restore`
// records it in `<internal>/system_start_jobs.yaml` and asks the host to
// shut down. On the next boot `run_startup_jobs` removes the file and runs
// the restore before any service starts. The file is removed first so a
// failing restore cannot trap the process in a boot loop.
//
// `startup_import` seeds an empty engine from its own dump directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::BackupEngine;
use super::restore::RestoreReport;
use crate::api::default_api_map;
use crate::bus::{ShutdownRequest, topic};
use crate::context::CoreContext;
use crate::error::CoreError;
use crate::storage::read_dump_dir;

pub const START_JOBS_FILE: &str = "system_start_jobs.yaml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartupJobs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore: Option<StartupRestore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartupRestore {
    pub bundle: PathBuf,
    pub requested_on: DateTime<Utc>,
}

fn jobs_file(ctx: &CoreContext) -> PathBuf {
    ctx.directories().internal.join(START_JOBS_FILE)
}

/// Record a restore of `bundle` for the next boot and request shutdown.
pub async fn schedule_restore(ctx: &Arc<CoreContext>, bundle: &Path) -> Result<PathBuf, CoreError> {
    if !tokio::fs::try_exists(bundle)
        .await
        .map_err(|e| CoreError::io(bundle, e))?
    {
        return Err(CoreError::NotFound {
            entity_type: "backup bundle".into(),
            identifier: bundle.display().to_string(),
        });
    }
    let jobs = StartupJobs {
        restore: Some(StartupRestore {
            bundle: bundle.to_path_buf(),
            requested_on: Utc::now(),
        }),
    };

    let path = jobs_file(ctx);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CoreError::io(parent, e))?;
    }
    tokio::fs::write(&path, serde_yaml::to_string(&jobs)?)
        .await
        .map_err(|e| CoreError::io(&path, e))?;
    info!(bundle = %bundle.display(), "restore scheduled for next start");

    ctx.bus.publish(
        topic::SHUTDOWN,
        &ShutdownRequest {
            reason: "restore scheduled".into(),
        },
    )?;
    Ok(path)
}

/// Run and remove the pending startup jobs, if any.
pub async fn run_startup_jobs(engine: &BackupEngine) -> Result<Option<RestoreReport>, CoreError> {
    let path = jobs_file(engine.context());
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CoreError::io(&path, e)),
    };
    tokio::fs::remove_file(&path)
        .await
        .map_err(|e| CoreError::io(&path, e))?;

    let jobs: StartupJobs = serde_yaml::from_slice(&bytes)
        .map_err(|e| CoreError::validation(format!("{}: {e}", path.display())))?;
    let Some(restore) = jobs.restore else {
        debug!("startup jobs file had nothing to do");
        return Ok(None);
    };
    info!(
        bundle = %restore.bundle.display(),
        requested_on = %restore.requested_on,
        "running deferred restore"
    );
    engine.restore(&restore.bundle).await.map(Some)
}

/// Seed storage from the engine's startup dump, if it asks for one.
/// Returns the number of rows imported.
pub async fn startup_import(ctx: &Arc<CoreContext>) -> Result<usize, CoreError> {
    let Some(import) = ctx.storage.startup_import() else {
        return Ok(0);
    };
    let files = read_dump_dir(&import.dir, import.format).await?;
    if files.is_empty() {
        debug!(dir = %import.dir.display(), "no dump files to import");
        return Ok(0);
    }

    let apis = default_api_map(ctx);
    let _keep_timestamps = ctx.pause_modified_on();
    let mut total = 0;
    for file in files {
        let Some(api) = apis.get(&file.collection) else {
            warn!(file = %file.path.display(), "no api for dump file, skipped");
            continue;
        };
        total += api.import_rows(file.rows).await?;
    }
    info!(rows = total, dir = %import.dir.display(), "storage seeded from dump");
    Ok(total)
}
