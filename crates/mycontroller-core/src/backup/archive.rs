// ── Bundle packing ──
//
// The engine only ever hands an `Archiver` a finished bundle directory or
// asks it to restore one. Compression formats live outside the core; the
// built-in `DirectoryArchiver` keeps bundles as plain directories.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::CoreError;

#[async_trait]
pub trait Archiver: Send + Sync {
    /// Pack `source` into a bundle at `target` (without extension).
    /// Returns the bundle path actually written.
    async fn pack(&self, source: &Path, target: &Path) -> Result<PathBuf, CoreError>;

    /// Extract `bundle` into `dest`, which may not exist yet.
    async fn unpack(&self, bundle: &Path, dest: &Path) -> Result<(), CoreError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryArchiver;

#[async_trait]
impl Archiver for DirectoryArchiver {
    async fn pack(&self, source: &Path, target: &Path) -> Result<PathBuf, CoreError> {
        if tokio::fs::try_exists(target)
            .await
            .map_err(|e| CoreError::io(target, e))?
        {
            return Err(CoreError::Conflict {
                message: format!("bundle {} already exists", target.display()),
            });
        }
        let files = copy_dir(source, target).await?;
        debug!(bundle = %target.display(), files, "bundle packed");
        Ok(target.to_path_buf())
    }

    async fn unpack(&self, bundle: &Path, dest: &Path) -> Result<(), CoreError> {
        if !tokio::fs::metadata(bundle)
            .await
            .map_err(|e| CoreError::io(bundle, e))?
            .is_dir()
        {
            return Err(CoreError::validation(format!(
                "{} is not a bundle directory",
                bundle.display()
            )));
        }
        let files = copy_dir(bundle, dest).await?;
        debug!(bundle = %bundle.display(), files, "bundle unpacked");
        Ok(())
    }
}

/// Recursively copy `source` into `dest`, overwriting files that exist.
/// A missing `source` copies nothing. Returns the number of files copied.
pub async fn copy_dir(source: &Path, dest: &Path) -> Result<usize, CoreError> {
    let source = source.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || copy_dir_blocking(&source, &dest))
        .await
        .map_err(|e| CoreError::Internal(format!("copy task failed: {e}")))?
}

fn copy_dir_blocking(source: &Path, dest: &Path) -> Result<usize, CoreError> {
    if !source.exists() {
        return Ok(0);
    }
    std::fs::create_dir_all(dest).map_err(|e| CoreError::io(dest, e))?;

    let mut copied = 0;
    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(|e| CoreError::OperationFailed {
            message: format!("walking {}: {e}", source.display()),
        })?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| CoreError::io(&target, e))?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| CoreError::io(parent, e))?;
            }
            std::fs::copy(entry.path(), &target).map_err(|e| CoreError::io(&target, e))?;
            copied += 1;
        }
    }
    Ok(copied)
}
