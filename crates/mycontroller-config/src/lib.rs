//! Configuration for the MyController server.
//!
//! Layering: built-in defaults → TOML file → `MC_`-prefixed environment
//! (nested keys split on `__`, e.g. `MC_JOBS__NODE_STATE__ENABLED`), then
//! the fixed deployment variables (`MC_DIR_*`, `MC_TELEMETRY_ENABLED`,
//! `MC_METRIC_DB_DISABLED`, `JWT_ACCESS_SECRET`). The result is translated
//! into `mycontroller_core::CoreConfig` by [`to_core_config`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use mycontroller_core::StorageFormat;
use mycontroller_core::config::{
    AnalyticsConfig, AuthConfig, CoreConfig, Directories, NodeStateConfig, ServiceConfig,
    SystemJobsConfig,
};
use mycontroller_core::storage::MemoryStorageConfig;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration of one server installation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub directories: DirectoriesConfig,
    pub storage: StorageConfig,
    pub bus: BusConfig,
    pub service: ServiceSection,
    pub auth: AuthSection,
    pub jobs: JobsConfig,
    pub backup: BackupConfig,
    pub metric_db: MetricDbConfig,
}

/// Data root plus optional per-directory overrides.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DirectoriesConfig {
    pub home: PathBuf,
    pub data: Option<PathBuf>,
    pub storage: Option<PathBuf>,
    pub firmware: Option<PathBuf>,
    pub internal: Option<PathBuf>,
    pub secure_share: Option<PathBuf>,
    pub insecure_share: Option<PathBuf>,
}

impl Default for DirectoriesConfig {
    fn default() -> Self {
        Self {
            home: PathBuf::from("mc_home"),
            data: None,
            storage: None,
            firmware: None,
            internal: None,
            secure_share: None,
            insecure_share: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub dump_enabled: bool,
    /// Humantime duration, e.g. `"1m"`.
    pub dump_interval: String,
    pub dump_formats: Vec<StorageFormat>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dump_enabled: true,
            dump_interval: "1m".into(),
            dump_formats: vec![StorageFormat::Yaml],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BusConfig {
    pub queue_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: mycontroller_core::bus::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceSection {
    pub stop_timeout: String,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            stop_timeout: "10s".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthSection {
    /// Never written back out; prefer `JWT_ACCESS_SECRET`.
    #[serde(skip_serializing)]
    pub jwt_secret: Option<String>,
    /// Defaults to `/etc/machine-id`.
    pub host_id: Option<String>,
    pub default_expiry: String,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            host_id: None,
            default_expiry: "24h".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct JobsConfig {
    pub node_state: NodeStateSection,
    /// Six-field cron expression, seconds first.
    pub sun_refresh_cron: String,
    pub analytics: AnalyticsSection,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            node_state: NodeStateSection::default(),
            sun_refresh_cron: SystemJobsConfig::default().sun_refresh_cron,
            analytics: AnalyticsSection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeStateSection {
    pub enabled: bool,
    pub execution_interval: String,
    pub inactive_duration: String,
}

impl Default for NodeStateSection {
    fn default() -> Self {
        Self {
            enabled: true,
            execution_interval: "15m".into(),
            inactive_duration: "15m".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalyticsSection {
    pub enabled: bool,
    pub endpoint: String,
}

impl Default for AnalyticsSection {
    fn default() -> Self {
        let core = AnalyticsConfig::default();
        Self {
            enabled: core.enabled,
            endpoint: core.endpoint,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackupConfig {
    pub format: StorageFormat,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricDbConfig {
    pub disabled: bool,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "mycontroller", "mycontroller").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("mycontroller");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults, then the TOML file at `path` (if present), then `MC_` env.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("MC_").split("__"))
}

/// Load the full config from file and the process environment.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// Like [`load_config`] but with the fixed variables read through `lookup`.
pub fn load_config_with(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    let mut config: Config = figment(path).extract()?;
    apply_env_overrides(&mut config, lookup)?;
    Ok(config)
}

/// Deployment variables understood regardless of the `MC_` nesting scheme.
pub mod env_var {
    pub const DIR_DATA: &str = "MC_DIR_DATA";
    pub const DIR_DATA_STORAGE: &str = "MC_DIR_DATA_STORAGE";
    pub const DIR_DATA_FIRMWARE: &str = "MC_DIR_DATA_FIRMWARE";
    pub const DIR_DATA_INTERNAL: &str = "MC_DIR_DATA_INTERNAL";
    pub const DIR_SHARE_SECURE: &str = "MC_DIR_SHARE_SECURE";
    pub const DIR_SHARE_INSECURE: &str = "MC_DIR_SHARE_INSECURE";
    pub const TELEMETRY_ENABLED: &str = "MC_TELEMETRY_ENABLED";
    pub const METRIC_DB_DISABLED: &str = "MC_METRIC_DB_DISABLED";
    pub const JWT_ACCESS_SECRET: &str = "JWT_ACCESS_SECRET";
}

/// Apply the fixed deployment variables on top of a loaded config.
pub fn apply_env_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    let dirs = &mut config.directories;
    for (var, slot) in [
        (env_var::DIR_DATA, &mut dirs.data),
        (env_var::DIR_DATA_STORAGE, &mut dirs.storage),
        (env_var::DIR_DATA_FIRMWARE, &mut dirs.firmware),
        (env_var::DIR_DATA_INTERNAL, &mut dirs.internal),
        (env_var::DIR_SHARE_SECURE, &mut dirs.secure_share),
        (env_var::DIR_SHARE_INSECURE, &mut dirs.insecure_share),
    ] {
        if let Some(value) = lookup(var).filter(|v| !v.is_empty()) {
            *slot = Some(PathBuf::from(value));
        }
    }

    if let Some(value) = lookup(env_var::TELEMETRY_ENABLED) {
        config.jobs.analytics.enabled = parse_bool(env_var::TELEMETRY_ENABLED, &value)?;
    }
    if let Some(value) = lookup(env_var::METRIC_DB_DISABLED) {
        config.metric_db.disabled = parse_bool(env_var::METRIC_DB_DISABLED, &value)?;
    }
    if let Some(secret) = lookup(env_var::JWT_ACCESS_SECRET).filter(|v| !v.is_empty()) {
        config.auth.jwt_secret = Some(secret);
    }
    Ok(())
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(invalid(field, format!("expected a boolean, got '{other}'"))),
    }
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(cfg)?)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

fn duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|e| invalid(field, format!("'{value}': {e}")))
}

fn directories(cfg: &DirectoriesConfig) -> Directories {
    let mut dirs = Directories::under(&cfg.home);
    if let Some(data) = &cfg.data {
        dirs.data.clone_from(data);
        dirs.storage = data.join("storage");
        dirs.firmware = data.join("firmware");
        dirs.internal = data.join("internal");
    }
    for (slot, value) in [
        (&mut dirs.storage, &cfg.storage),
        (&mut dirs.firmware, &cfg.firmware),
        (&mut dirs.internal, &cfg.internal),
        (&mut dirs.secure_share, &cfg.secure_share),
        (&mut dirs.insecure_share, &cfg.insecure_share),
    ] {
        if let Some(path) = value {
            slot.clone_from(path);
        }
    }
    dirs
}

fn machine_id() -> Option<String> {
    std::fs::read_to_string("/etc/machine-id")
        .ok()
        .map(|id| id.trim().to_owned())
        .filter(|id| !id.is_empty())
}

/// Build the core runtime config, validating every humantime value.
///
/// A missing JWT secret is replaced by a random one, which invalidates
/// issued tokens on every restart.
pub fn to_core_config(cfg: &Config) -> Result<CoreConfig, ConfigError> {
    if cfg.storage.dump_formats.is_empty() {
        return Err(invalid("storage.dump_formats", "at least one format is required"));
    }
    if cfg.bus.queue_capacity == 0 {
        return Err(invalid("bus.queue_capacity", "must be greater than zero"));
    }

    let directories = directories(&cfg.directories);
    let storage = MemoryStorageConfig {
        dump_enabled: cfg.storage.dump_enabled,
        dump_interval: duration("storage.dump_interval", &cfg.storage.dump_interval)?,
        dump_dir: directories.storage.join("memory"),
        dump_formats: cfg.storage.dump_formats.clone(),
    };

    let jwt_secret = cfg
        .auth
        .jwt_secret
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
    let auth = AuthConfig {
        jwt_secret: SecretString::from(jwt_secret),
        host_id: cfg
            .auth
            .host_id
            .clone()
            .or_else(machine_id)
            .unwrap_or_else(|| "mycontroller".into()),
        default_expiry: duration("auth.default_expiry", &cfg.auth.default_expiry)?,
    };

    let jobs = &cfg.jobs;
    let jobs = SystemJobsConfig {
        node_state: NodeStateConfig {
            enabled: jobs.node_state.enabled,
            execution_interval: duration(
                "jobs.node_state.execution_interval",
                &jobs.node_state.execution_interval,
            )?,
            inactive_duration: duration(
                "jobs.node_state.inactive_duration",
                &jobs.node_state.inactive_duration,
            )?,
        },
        sun_refresh_cron: jobs.sun_refresh_cron.clone(),
        analytics: AnalyticsConfig {
            enabled: jobs.analytics.enabled,
            endpoint: jobs.analytics.endpoint.clone(),
        },
    };

    Ok(CoreConfig {
        directories,
        storage,
        bus_queue_capacity: cfg.bus.queue_capacity,
        service: ServiceConfig {
            stop_timeout: duration("service.stop_timeout", &cfg.service.stop_timeout)?,
        },
        auth,
        jobs,
        backup_format: cfg.backup.format,
        metric_db_disabled: cfg.metric_db.disabled,
    })
}
