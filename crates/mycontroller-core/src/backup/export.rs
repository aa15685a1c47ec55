// ── Export ──

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use super::archive::copy_dir;
use super::manifest::{Manifest, STORAGE_DIR};
use super::{BackupEngine, remove_scratch};
use crate::api::{BackupApi, default_api_map};
use crate::error::CoreError;
use crate::storage::{Pagination, StorageFormat, write_dump};

const PAGE_SIZE: i64 = 50;

#[derive(Debug, Clone)]
pub struct ExportResult {
    /// Path returned by the archiver.
    pub bundle: PathBuf,
    pub manifest: Manifest,
    /// Rows written per collection.
    pub rows: BTreeMap<String, usize>,
}

impl BackupEngine {
    /// Export the whole system into `target_dir/<prefix>_<timestamp>`.
    pub async fn export(
        &self,
        target_dir: &Path,
        prefix: &str,
        format: StorageFormat,
    ) -> Result<ExportResult, CoreError> {
        let _running = self.ctx.begin_backup()?;
        let created_on = Utc::now();
        let filename = format!("{prefix}_{}", created_on.format("%Y%m%d_%H%M%S"));
        info!(%filename, %format, "backup started");

        let scratch = self.scratch_dir("export");
        let root = scratch.join(&filename);
        let result = match self.write_bundle(&root, &filename, format, created_on).await {
            Ok((manifest, rows)) => self
                .archiver
                .pack(&root, &target_dir.join(&filename))
                .await
                .map(|bundle| ExportResult {
                    bundle,
                    manifest,
                    rows,
                }),
            Err(e) => Err(e),
        };
        remove_scratch(&scratch).await;

        let result = result?;
        info!(bundle = %result.bundle.display(), "backup completed");
        Ok(result)
    }

    async fn write_bundle(
        &self,
        root: &Path,
        filename: &str,
        format: StorageFormat,
        created_on: DateTime<Utc>,
    ) -> Result<(Manifest, BTreeMap<String, usize>), CoreError> {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| CoreError::io(root, e))?;

        let manifest = Manifest {
            filename: filename.to_owned(),
            storage_export_type: format,
            created_on,
            version: self.ctx.version.clone(),
            directories: self.ctx.directories().tracked(),
        };
        manifest.write(root).await?;

        for (name, source) in &manifest.directories {
            let files = copy_dir(source, &root.join(name)).await?;
            debug!(dir = %name, files, "tracked directory copied");
        }

        let storage_dir = root.join(STORAGE_DIR);
        let mut rows = BTreeMap::new();
        for (collection, api) in default_api_map(&self.ctx) {
            let exported = self.export_collection(&collection, api.as_ref()).await?;
            write_dump(&storage_dir, &collection, &exported, format).await?;
            rows.insert(collection, exported.len());
        }
        Ok((manifest, rows))
    }

    /// Page through one collection, applying its transformer if any.
    async fn export_collection(
        &self,
        collection: &str,
        api: &dyn BackupApi,
    ) -> Result<Vec<Value>, CoreError> {
        let transform = self.transformers.get(collection);
        let mut rows = Vec::new();
        let mut offset = 0;
        loop {
            let page = api.export_page(&Pagination::page(PAGE_SIZE, offset)).await?;
            let fetched = page.data.len();
            for row in page.data {
                rows.push(match transform {
                    Some(transform) => transform(row)?,
                    None => row,
                });
            }
            offset += PAGE_SIZE;
            if fetched == 0 || page.count <= offset.unsigned_abs() {
                break;
            }
        }
        debug!(collection, rows = rows.len(), "collection exported");
        Ok(rows)
    }
}
