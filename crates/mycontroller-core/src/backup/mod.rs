// ── Backup and restore ──
//
// Export writes a bundle (manifest, tracked directories, paginated entity
// dumps) and hands it to an `Archiver`. Restore unpacks a bundle, swaps the
// whole database under a paused bus and paused storage, copies the
// directories back and runs pending upgrades. Each side is single-flight
// through the process flags on `CoreContext`.

mod archive;
mod export;
mod manifest;
mod restore;
mod startup;
mod upgrade;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

pub use archive::{Archiver, DirectoryArchiver, copy_dir};
pub use export::ExportResult;
pub use manifest::{MANIFEST_FILE, Manifest, STORAGE_DIR};
pub use restore::RestoreReport;
pub use startup::{
    START_JOBS_FILE, StartupJobs, StartupRestore, run_startup_jobs, schedule_restore,
    startup_import,
};
pub use upgrade::{Upgrade, UpgradeFn, UpgradeRegistry, last_applied_patch};

use crate::api::{ApiMap, default_api_map};
use crate::context::CoreContext;
use crate::error::CoreError;
use crate::version::VersionInfo;

/// Rewrites one exported row. Keyed by collection name.
pub type RowTransformer = Arc<dyn Fn(Value) -> Result<Value, CoreError> + Send + Sync>;

/// Picks the API map used to decode a bundle written by `version`.
/// Bundles that predate a schema change can be decoded into the shapes of
/// their time and migrated by an upgrade afterwards.
pub trait ApiMapResolver: Send + Sync {
    fn resolve(&self, ctx: &Arc<CoreContext>, version: &VersionInfo) -> ApiMap;
}

impl<F> ApiMapResolver for F
where
    F: Fn(&Arc<CoreContext>, &VersionInfo) -> ApiMap + Send + Sync,
{
    fn resolve(&self, ctx: &Arc<CoreContext>, version: &VersionInfo) -> ApiMap {
        self(ctx, version)
    }
}

/// Always the current entity shapes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentApiMap;

impl ApiMapResolver for CurrentApiMap {
    fn resolve(&self, ctx: &Arc<CoreContext>, _version: &VersionInfo) -> ApiMap {
        default_api_map(ctx)
    }
}

pub struct BackupEngine {
    ctx: Arc<CoreContext>,
    archiver: Arc<dyn Archiver>,
    resolver: Arc<dyn ApiMapResolver>,
    upgrades: Arc<UpgradeRegistry>,
    transformers: BTreeMap<String, RowTransformer>,
}

impl BackupEngine {
    pub fn new(ctx: Arc<CoreContext>) -> Self {
        Self {
            ctx,
            archiver: Arc::new(DirectoryArchiver),
            resolver: Arc::new(CurrentApiMap),
            upgrades: Arc::new(UpgradeRegistry::new()),
            transformers: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_archiver(mut self, archiver: Arc<dyn Archiver>) -> Self {
        self.archiver = archiver;
        self
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn ApiMapResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    #[must_use]
    pub fn with_upgrades(mut self, upgrades: UpgradeRegistry) -> Self {
        self.upgrades = Arc::new(upgrades);
        self
    }

    #[must_use]
    pub fn with_transformer<F>(mut self, collection: impl Into<String>, transform: F) -> Self
    where
        F: Fn(Value) -> Result<Value, CoreError> + Send + Sync + 'static,
    {
        self.transformers
            .insert(collection.into(), Arc::new(transform));
        self
    }

    pub fn context(&self) -> &Arc<CoreContext> {
        &self.ctx
    }

    pub fn upgrades(&self) -> &UpgradeRegistry {
        &self.upgrades
    }

    /// A fresh scratch directory under the internal backup area.
    fn scratch_dir(&self, purpose: &str) -> PathBuf {
        self.ctx
            .directories()
            .backup_scratch()
            .join(format!("{purpose}_{}", uuid::Uuid::new_v4().simple()))
    }
}

/// Best-effort removal of a scratch directory.
async fn remove_scratch(dir: &std::path::Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to remove scratch directory");
        }
        _ => {}
    }
}
