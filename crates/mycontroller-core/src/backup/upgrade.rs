// ── Upgrade migrations ──
//
// Ordered, versioned migration functions run after a restore (and at
// boot). The highest version applied so far is kept in the `version`
// settings document as `lastAppliedPatch`; only strictly newer upgrades
// run, and the marker is persisted after each one so a failed migration
// resumes where it stopped.

use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::api::EntityApi;
use crate::context::CoreContext;
use crate::error::CoreError;
use crate::model::{Settings, settings_key};
use crate::version::SemVer;

const LAST_APPLIED_PATCH: &str = "lastAppliedPatch";

pub type UpgradeFn =
    Arc<dyn Fn(Arc<CoreContext>) -> BoxFuture<'static, Result<(), CoreError>> + Send + Sync>;

#[derive(Clone)]
pub struct Upgrade {
    pub version: SemVer,
    pub name: String,
    run: UpgradeFn,
}

impl std::fmt::Debug for Upgrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upgrade")
            .field("version", &self.version)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpgradeRegistry {
    upgrades: Vec<Upgrade>,
}

impl UpgradeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with<F, Fut>(mut self, version: SemVer, name: impl Into<String>, run: F) -> Self
    where
        F: Fn(Arc<CoreContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        self.upgrades.push(Upgrade {
            version,
            name: name.into(),
            run: Arc::new(move |ctx| run(ctx).boxed()),
        });
        self.upgrades.sort_by_key(|u| u.version);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.upgrades.is_empty()
    }

    /// Upgrades strictly newer than `applied`, oldest first.
    pub fn pending(&self, applied: Option<SemVer>) -> Vec<&Upgrade> {
        self.upgrades
            .iter()
            .filter(|u| applied.is_none_or(|applied| u.version > applied))
            .collect()
    }

    /// Run every pending upgrade. Returns the names of those applied.
    pub async fn run(&self, ctx: &Arc<CoreContext>) -> Result<Vec<String>, CoreError> {
        let applied = last_applied_patch(ctx).await?;
        let pending = self.pending(applied);
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let mut names = Vec::with_capacity(pending.len());
        for upgrade in pending {
            info!(version = %upgrade.version, name = %upgrade.name, "applying upgrade");
            (upgrade.run)(Arc::clone(ctx)).await.inspect_err(|e| {
                warn!(version = %upgrade.version, error = %e, "upgrade failed");
            })?;
            set_last_applied_patch(ctx, upgrade.version).await?;
            names.push(upgrade.name.clone());
        }
        Ok(names)
    }
}

/// The `lastAppliedPatch` marker, or `None` when nothing was applied yet.
pub async fn last_applied_patch(ctx: &Arc<CoreContext>) -> Result<Option<SemVer>, CoreError> {
    let settings = match EntityApi::<Settings>::new(Arc::clone(ctx))
        .get_by_id(settings_key::VERSION)
        .await
    {
        Ok(settings) => settings,
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => return Err(e),
    };
    let Some(text) = settings.spec.get(LAST_APPLIED_PATCH).and_then(Value::as_str) else {
        return Ok(None);
    };
    text.parse()
        .map(Some)
        .map_err(|e| CoreError::validation(format!("{LAST_APPLIED_PATCH}: {e}")))
}

async fn set_last_applied_patch(ctx: &Arc<CoreContext>, version: SemVer) -> Result<(), CoreError> {
    let api = EntityApi::<Settings>::new(Arc::clone(ctx));
    let mut settings = match api.get_by_id(settings_key::VERSION).await {
        Ok(settings) => settings,
        Err(e) if e.is_not_found() => Settings {
            id: settings_key::VERSION.to_owned(),
            ..Settings::default()
        },
        Err(e) => return Err(e),
    };
    if !settings.spec.is_object() {
        settings.spec = Value::Object(Map::new());
    }
    if let Some(spec) = settings.spec.as_object_mut() {
        spec.insert(LAST_APPLIED_PATCH.to_owned(), Value::String(version.to_string()));
    }
    api.save(settings).await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::context::test_support::context;
    use crate::model::User;
    use futures_util::future::{Ready, ready};
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn recording(
        log: &Log,
        name: &'static str,
    ) -> impl Fn(Arc<CoreContext>) -> Ready<Result<(), CoreError>> + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |_| {
            log.lock().unwrap().push(name);
            ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn runs_newer_upgrades_in_order_and_persists_marker() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = UpgradeRegistry::new()
            .with(SemVer::new(2, 1, 0), "v2.1.0", recording(&log, "v2.1.0"))
            .with(SemVer::new(1, 9, 0), "v1.9.0", recording(&log, "v1.9.0"))
            .with(SemVer::new(2, 0, 0), "v2.0.0", recording(&log, "v2.0.0"));

        EntityApi::<Settings>::new(Arc::clone(&ctx))
            .save(Settings {
                id: settings_key::VERSION.into(),
                spec: serde_json::json!({ "lastAppliedPatch": "1.9.0", "other": 1 }),
                ..Settings::default()
            })
            .await
            .unwrap();

        let applied = registry.run(&ctx).await.unwrap();
        assert_eq!(applied, vec!["v2.0.0", "v2.1.0"]);
        assert_eq!(*log.lock().unwrap(), vec!["v2.0.0", "v2.1.0"]);
        assert_eq!(
            last_applied_patch(&ctx).await.unwrap(),
            Some(SemVer::new(2, 1, 0))
        );
        let stored = EntityApi::<Settings>::new(Arc::clone(&ctx))
            .get_by_id(settings_key::VERSION)
            .await
            .unwrap();
        assert_eq!(stored.spec["other"], 1);

        // Second run is a no-op.
        assert!(registry.run(&ctx).await.unwrap().is_empty());
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_upgrade_keeps_previous_marker() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let registry = UpgradeRegistry::new()
            .with(SemVer::new(1, 0, 0), "seed admin", |ctx| async move {
                EntityApi::<User>::new(ctx)
                    .save(User {
                        id: "admin".into(),
                        username: "admin".into(),
                        ..User::default()
                    })
                    .await
                    .map(|_| ())
            })
            .with(SemVer::new(1, 1, 0), "broken", |_| async {
                Err(CoreError::OperationFailed {
                    message: "boom".into(),
                })
            });

        assert!(registry.run(&ctx).await.is_err());
        assert_eq!(
            last_applied_patch(&ctx).await.unwrap(),
            Some(SemVer::new(1, 0, 0))
        );
        assert_eq!(registry.pending(Some(SemVer::new(1, 0, 0))).len(), 1);
        assert_eq!(registry.pending(None).len(), 2);
    }
}
