//! Coordination core of the MyController server.
//!
//! Everything here hangs off one [`CoreContext`] built at boot:
//!
//! - **[`Bus`]**: in-process publish/subscribe with per-subscriber
//!   bounded queues. Publishing can be paused while the database is
//!   swapped out under a restore.
//!
//! - **[`Storage`]**: the persistence contract (filter, sort, paginate,
//!   pause/resume/clear) with the in-memory [`MemoryStorage`] engine and
//!   its periodic dump. Typed access goes through [`EntityApi`].
//!
//! - **[`ResourceService`]**: supervisor for long-running workers
//!   (gateways, handlers, tasks, schedules, virtual assistants) driven by
//!   service commands on the bus.
//!
//! - **[`DeletionEngine`]**: keeps the gateway → node → source → field
//!   tree consistent when parents are deleted.
//!
//! - **[`BackupEngine`]**: bundle export and restore with upgrade
//!   migrations and restart-deferred restore.
//!
//! - **[`AuthService`]**: password hashing, HS256 JWTs, service tokens and
//!   inbound request authentication.
//!
//! - **[`SystemJobs`]**: node-state verification, sunrise/sunset refresh
//!   and the analytics report on a named cron [`Scheduler`].
//!
//! - **[`ForwardEngine`]** mirrors field values along forward-payload
//!   rules; [`CommandRunner`] runs external commands with a timeout.

pub mod api;
pub mod auth;
pub mod backup;
pub mod bus;
pub mod config;
pub mod context;
pub mod deletion;
pub mod error;
pub mod exec;
pub mod forward;
pub mod jobs;
pub mod model;
pub mod service;
pub mod storage;
pub mod version;

// ── Primary re-exports ──────────────────────────────────────────────
pub use api::{ApiMap, BackupApi, EntityApi, default_api_map};
pub use auth::{AuthError, AuthService};
pub use backup::{BackupEngine, UpgradeRegistry};
pub use bus::{Bus, Message};
pub use config::{CoreConfig, Directories};
pub use context::CoreContext;
pub use deletion::DeletionEngine;
pub use error::{CoreError, ErrorEnvelope};
pub use exec::{CommandRunner, ExitType};
pub use forward::ForwardEngine;
pub use jobs::{Scheduler, SystemJobs};
pub use model::{Collection, Entity, Event, EventType, ManagedResource, State, Status};
pub use service::{ResourceApi, ResourceService};
pub use storage::{Filter, MemoryStorage, Pagination, Storage, StorageError, StorageFormat};
pub use version::VersionInfo;
