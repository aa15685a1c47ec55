// ── Shared core context ──
//
// One `CoreContext` per process, threaded through every API instead of
// ambient statics. It owns the bus, the storage engine, the directory
// layout and the process-wide flags consulted by writers and by the
// backup engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::bus::Bus;
use crate::config::{CoreConfig, Directories};
use crate::error::CoreError;
use crate::model::Collection;
use crate::storage::Storage;
use crate::version::VersionInfo;

pub struct CoreContext {
    pub bus: Bus,
    pub storage: Arc<dyn Storage>,
    pub config: CoreConfig,
    pub version: VersionInfo,
    pause_modified_on: AtomicBool,
    backup_running: AtomicBool,
    restore_running: AtomicBool,
    row_locks: DashMap<(Collection, String), Arc<Mutex<()>>>,
}

impl CoreContext {
    pub fn new(config: CoreConfig, bus: Bus, storage: Arc<dyn Storage>) -> Arc<Self> {
        Arc::new(Self {
            bus,
            storage,
            config,
            version: VersionInfo::current(),
            pause_modified_on: AtomicBool::new(false),
            backup_running: AtomicBool::new(false),
            restore_running: AtomicBool::new(false),
            row_locks: DashMap::new(),
        })
    }

    pub fn directories(&self) -> &Directories {
        &self.config.directories
    }

    // ── Row locks ────────────────────────────────────────────────

    /// Serialize read-modify-write cycles on one row.
    pub(crate) async fn lock_row(&self, collection: Collection, id: &str) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(
            self.row_locks
                .entry((collection, id.to_owned()))
                .or_default()
                .value(),
        );
        lock.lock_owned().await
    }

    pub(crate) fn forget_row(&self, collection: Collection, id: &str) {
        self.row_locks.remove(&(collection, id.to_owned()));
    }

    // ── Process flags ────────────────────────────────────────────

    /// While set, saves keep the `modifiedOn` they carry.
    pub fn is_modified_on_paused(&self) -> bool {
        self.pause_modified_on.load(Ordering::Acquire)
    }

    pub fn pause_modified_on(self: &Arc<Self>) -> FlagGuard {
        self.pause_modified_on.store(true, Ordering::Release);
        FlagGuard {
            ctx: Arc::clone(self),
            flag: Flag::PauseModifiedOn,
        }
    }

    pub fn is_backup_running(&self) -> bool {
        self.backup_running.load(Ordering::Acquire)
    }

    pub fn is_restore_running(&self) -> bool {
        self.restore_running.load(Ordering::Acquire)
    }

    /// Claim the single backup slot; fails instead of waiting.
    pub fn begin_backup(self: &Arc<Self>) -> Result<FlagGuard, CoreError> {
        self.claim(Flag::BackupRunning)
            .ok_or(CoreError::BackupRunning)
    }

    /// Claim the single restore slot; fails instead of waiting.
    pub fn begin_restore(self: &Arc<Self>) -> Result<FlagGuard, CoreError> {
        self.claim(Flag::RestoreRunning)
            .ok_or(CoreError::RestoreRunning)
    }

    fn claim(self: &Arc<Self>, flag: Flag) -> Option<FlagGuard> {
        self.flag(flag)
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        debug!(?flag, "process flag set");
        Some(FlagGuard {
            ctx: Arc::clone(self),
            flag,
        })
    }

    fn flag(&self, flag: Flag) -> &AtomicBool {
        match flag {
            Flag::PauseModifiedOn => &self.pause_modified_on,
            Flag::BackupRunning => &self.backup_running,
            Flag::RestoreRunning => &self.restore_running,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Flag {
    PauseModifiedOn,
    BackupRunning,
    RestoreRunning,
}

/// Clears its process flag when dropped.
#[must_use = "the flag is cleared as soon as the guard is dropped"]
pub struct FlagGuard {
    ctx: Arc<CoreContext>,
    flag: Flag,
}

impl Drop for FlagGuard {
    fn drop(&mut self) {
        self.ctx.flag(self.flag).store(false, Ordering::Release);
        debug!(flag = ?self.flag, "process flag cleared");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use super::CoreContext;
    use crate::bus::Bus;
    use crate::config::{CoreConfig, Directories};
    use crate::storage::{MemoryStorage, MemoryStorageConfig, StorageFormat};

    /// A context over a fresh in-memory engine rooted in `dir`.
    pub(crate) fn context(dir: &std::path::Path) -> Arc<CoreContext> {
        let directories = Directories::under(dir);
        let storage = MemoryStorage::start(MemoryStorageConfig {
            dump_enabled: true,
            dump_interval: Duration::ZERO,
            dump_dir: directories.storage.join("memory"),
            dump_formats: vec![StorageFormat::Json],
        });
        let config = CoreConfig {
            directories,
            ..CoreConfig::default()
        };
        CoreContext::new(config, Bus::default(), storage)
    }
}
