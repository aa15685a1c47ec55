// ── Restore ──
//
// Order matters: bus publish is paused before storage so no subscriber
// sees a half-loaded database, and both are resumed even when the import
// fails. Once `clear_database` has been called every failure is
// `RestoreFatal`.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, error, info, warn};

use super::archive::copy_dir;
use super::manifest::{Manifest, STORAGE_DIR};
use super::{BackupEngine, remove_scratch};
use crate::api::ApiMap;
use crate::error::CoreError;
use crate::storage::read_dump_dir;

#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub manifest: Manifest,
    /// Rows imported per collection.
    pub rows: BTreeMap<String, usize>,
    /// Names of the upgrades applied afterwards.
    pub upgrades: Vec<String>,
}

fn fatal(e: impl std::fmt::Display) -> CoreError {
    CoreError::RestoreFatal {
        message: e.to_string(),
    }
}

impl BackupEngine {
    /// Replace the running system's data with the contents of `bundle`.
    pub async fn restore(&self, bundle: &Path) -> Result<RestoreReport, CoreError> {
        let _running = self.ctx.begin_restore()?;
        info!(bundle = %bundle.display(), "restore started");

        let scratch = self.scratch_dir("restore");
        let result = self.restore_from(bundle, &scratch).await;
        remove_scratch(&scratch).await;

        match &result {
            Ok(report) => info!(
                filename = %report.manifest.filename,
                rows = report.rows.values().sum::<usize>(),
                upgrades = report.upgrades.len(),
                "restore completed"
            ),
            Err(e @ CoreError::RestoreFatal { .. }) => {
                error!(error = %e, "restore failed after the database was cleared");
            }
            Err(e) => warn!(error = %e, "restore aborted"),
        }
        result
    }

    async fn restore_from(&self, bundle: &Path, extract: &Path) -> Result<RestoreReport, CoreError> {
        self.archiver.unpack(bundle, extract).await?;
        let manifest = Manifest::read(extract).await?;
        debug!(
            version = %manifest.version.version,
            format = %manifest.storage_export_type,
            "manifest read"
        );
        let apis = self.resolver.resolve(&self.ctx, &manifest.version);

        self.ctx.bus.pause_publish();
        let rows = self.replace_database(extract, &manifest, &apis).await;
        self.ctx.bus.resume_publish();
        let rows = rows?;

        let live = self.ctx.directories().tracked();
        for name in manifest.directories.keys() {
            let Some(target) = live.get(name) else {
                warn!(dir = %name, "bundle directory has no live counterpart, skipped");
                continue;
            };
            let files = copy_dir(&extract.join(name), target).await.map_err(fatal)?;
            debug!(dir = %name, files, "directory restored");
        }

        let upgrades = self.upgrades.run(&self.ctx).await.map_err(fatal)?;
        Ok(RestoreReport {
            manifest,
            rows,
            upgrades,
        })
    }

    /// Pause storage, clear it and import the bundle's dumps.
    async fn replace_database(
        &self,
        extract: &Path,
        manifest: &Manifest,
        apis: &ApiMap,
    ) -> Result<BTreeMap<String, usize>, CoreError> {
        let files = read_dump_dir(&extract.join(STORAGE_DIR), manifest.storage_export_type).await?;
        if let Some(unknown) = files.iter().find(|f| !apis.contains_key(&f.collection)) {
            return Err(CoreError::validation(format!(
                "bundle holds unknown collection '{}'",
                unknown.collection
            )));
        }

        self.ctx.storage.pause().await?;
        let imported = async {
            self.ctx.storage.clear_database().await.map_err(fatal)?;
            let _keep_timestamps = self.ctx.pause_modified_on();
            let mut rows = BTreeMap::new();
            for file in files {
                let Some(api) = apis.get(&file.collection) else {
                    continue;
                };
                let count = api.import_rows(file.rows).await.map_err(|e| {
                    fatal(format!("{}: {e}", file.path.display()))
                })?;
                *rows.entry(file.collection).or_insert(0) += count;
            }
            Ok::<_, CoreError>(rows)
        }
        .await;
        let resumed = self.ctx.storage.resume().await;

        let rows = imported?;
        resumed.map_err(fatal)?;
        Ok(rows)
    }
}
