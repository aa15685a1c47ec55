// ── Runtime configuration ──
//
// These types describe how the core runs: where it keeps its files,
// how storage dumps, how long workers get to stop, and which system
// jobs are scheduled. They never touch disk; the config crate builds a
// `CoreConfig` from TOML and environment and hands it in.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

use crate::storage::{MemoryStorageConfig, StorageFormat};

/// Filesystem layout of one installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directories {
    pub data: PathBuf,
    pub storage: PathBuf,
    pub firmware: PathBuf,
    /// Process-private files (`system_start_jobs.yaml`, restore scratch).
    pub internal: PathBuf,
    pub secure_share: PathBuf,
    pub insecure_share: PathBuf,
}

/// Logical names of the directories copied into backups.
pub mod tracked_dir {
    pub const FIRMWARE: &str = "firmware";
    pub const SECURE_SHARE: &str = "secure_share";
    pub const INSECURE_SHARE: &str = "insecure_share";
}

impl Directories {
    /// Conventional layout under a single data root.
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            data: root.join("data"),
            storage: root.join("data").join("storage"),
            firmware: root.join("data").join("firmware"),
            internal: root.join("data").join("internal"),
            secure_share: root.join("share").join("secure"),
            insecure_share: root.join("share").join("insecure"),
        }
    }

    /// Directories whose contents travel inside a backup bundle.
    pub fn tracked(&self) -> BTreeMap<String, PathBuf> {
        BTreeMap::from([
            (tracked_dir::FIRMWARE.to_owned(), self.firmware.clone()),
            (tracked_dir::SECURE_SHARE.to_owned(), self.secure_share.clone()),
            (tracked_dir::INSECURE_SHARE.to_owned(), self.insecure_share.clone()),
        ])
    }

    /// Scratch area for backup and restore work.
    pub fn backup_scratch(&self) -> PathBuf {
        self.internal.join("backup")
    }
}

impl Default for Directories {
    fn default() -> Self {
        Self::under("mc_home")
    }
}

/// JWT signing material.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Combined with `host_id` to form the HMAC key.
    pub jwt_secret: SecretString,
    pub host_id: String,
    pub default_expiry: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: SecretString::from(String::new()),
            host_id: String::new(),
            default_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Resource-service tuning shared by every managed collection.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub stop_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeStateConfig {
    pub enabled: bool,
    pub execution_interval: Duration,
    /// Nodes silent for longer than this are marked down.
    pub inactive_duration: Duration,
}

impl Default for NodeStateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            execution_interval: Duration::from_secs(15 * 60),
            inactive_duration: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    pub enabled: bool,
    pub endpoint: String,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://analytics.mycontroller.org/event".into(),
        }
    }
}

/// Schedules of the built-in system jobs.
#[derive(Debug, Clone)]
pub struct SystemJobsConfig {
    pub node_state: NodeStateConfig,
    /// Cron expression (seconds first) for the sunrise/sunset refresh.
    pub sun_refresh_cron: String,
    pub analytics: AnalyticsConfig,
}

impl Default for SystemJobsConfig {
    fn default() -> Self {
        Self {
            node_state: NodeStateConfig::default(),
            sun_refresh_cron: "0 15 1 * * *".into(),
            analytics: AnalyticsConfig::default(),
        }
    }
}

/// Everything the core needs to boot.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub directories: Directories,
    pub storage: MemoryStorageConfig,
    pub bus_queue_capacity: usize,
    pub service: ServiceConfig,
    pub auth: AuthConfig,
    pub jobs: SystemJobsConfig,
    pub backup_format: StorageFormat,
    /// Set when no metric database is attached; the core only reports it.
    pub metric_db_disabled: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        let directories = Directories::default();
        let storage = MemoryStorageConfig {
            dump_dir: directories.storage.join("memory"),
            ..MemoryStorageConfig::default()
        };
        Self {
            directories,
            storage,
            bus_queue_capacity: crate::bus::DEFAULT_QUEUE_CAPACITY,
            service: ServiceConfig::default(),
            auth: AuthConfig::default(),
            jobs: SystemJobsConfig::default(),
            backup_format: StorageFormat::Json,
            metric_db_disabled: false,
        }
    }
}
