// ── Boot and shutdown ──
//
// Boot order: storage, startup import, deferred restore, upgrades, then the
// bus consumers (deletion, forward, resource services, system jobs). Nothing
// publishes service commands before the database is final. Shutdown runs in
// reverse and closes storage last so its final dump sees every write.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use mycontroller_core::backup::{BackupEngine, UpgradeRegistry, run_startup_jobs, startup_import};
use mycontroller_core::bus::{ShutdownRequest, topic};
use mycontroller_core::config::CoreConfig;
use mycontroller_core::jobs::Scheduler;
use mycontroller_core::model::{Gateway, Handler, Schedule, Task, VirtualAssistant};
use mycontroller_core::service::{WorkerRegistry, service_name};
use mycontroller_core::storage::MemoryStorageConfig;
use mycontroller_core::{
    Bus, CoreContext, CoreError, DeletionEngine, ForwardEngine, ManagedResource, MemoryStorage,
    ResourceApi, ResourceService, SystemJobs, VersionInfo,
};

use crate::error::CliError;

/// Build a context over storage seeded from the last dump, with dumping off.
pub async fn offline_context(mut core: CoreConfig) -> Result<Arc<CoreContext>, CoreError> {
    core.storage = MemoryStorageConfig {
        dump_enabled: false,
        ..core.storage
    };
    let bus = Bus::new(core.bus_queue_capacity);
    let storage = MemoryStorage::start(core.storage.clone());
    let ctx = CoreContext::new(core, bus, storage);
    startup_import(&ctx).await?;
    Ok(ctx)
}

pub async fn close(ctx: &CoreContext) {
    ctx.bus.close();
    if let Err(e) = ctx.storage.close().await {
        warn!(error = %e, "storage close failed");
    }
}

/// Prepare storage for serving: seed it, apply a deferred restore, upgrade.
pub async fn boot(core: CoreConfig, upgrades: UpgradeRegistry) -> Result<Arc<CoreContext>, CoreError> {
    let version = VersionInfo::current();
    info!(version = %version.version, data = %core.directories.data.display(), "booting");

    let bus = Bus::new(core.bus_queue_capacity);
    let storage = MemoryStorage::start(core.storage.clone());
    let ctx = CoreContext::new(core, bus, storage);

    let imported = startup_import(&ctx).await?;
    info!(rows = imported, "storage ready");

    let engine = BackupEngine::new(Arc::clone(&ctx)).with_upgrades(upgrades);
    match run_startup_jobs(&engine).await {
        Ok(Some(report)) => info!(
            bundle = %report.manifest.filename,
            upgrades = report.upgrades.len(),
            "deferred restore applied"
        ),
        Ok(None) => {}
        Err(e @ CoreError::RestoreFatal { .. }) => return Err(e),
        Err(e) => error!(error = %e, "deferred restore skipped, keeping current data"),
    }

    let applied = engine.upgrades().run(&ctx).await?;
    if !applied.is_empty() {
        info!(?applied, "upgrades applied");
    }
    Ok(ctx)
}

fn start_service<R: ManagedResource>(
    name: &str,
    ctx: &Arc<CoreContext>,
) -> Result<ResourceService<R>, CoreError> {
    // Protocol providers register here. With none registered, resources keep
    // their stored state instead of being marked errored.
    let service = ResourceService::start(name, Arc::clone(ctx), WorkerRegistry::new());
    ResourceApi::<R>::new(Arc::clone(ctx), name).load_all()?;
    Ok(service)
}

/// The bus consumers of a running server.
pub struct Server {
    ctx: Arc<CoreContext>,
    deletion: DeletionEngine,
    forward: ForwardEngine,
    gateways: ResourceService<Gateway>,
    handlers: ResourceService<Handler>,
    tasks: ResourceService<Task>,
    schedules: ResourceService<Schedule>,
    assistants: ResourceService<VirtualAssistant>,
    jobs: SystemJobs,
}

impl Server {
    pub async fn start(ctx: Arc<CoreContext>) -> Result<Self, CoreError> {
        let deletion = DeletionEngine::start(Arc::clone(&ctx));
        let forward = ForwardEngine::start(Arc::clone(&ctx));
        let handlers = start_service(service_name::HANDLER, &ctx)?;
        let gateways = start_service(service_name::GATEWAY, &ctx)?;
        let tasks = start_service(service_name::TASK, &ctx)?;
        let schedules = start_service(service_name::SCHEDULE, &ctx)?;
        let assistants = start_service(service_name::VIRTUAL_ASSISTANT, &ctx)?;
        let jobs = SystemJobs::start(Arc::clone(&ctx), Arc::new(Scheduler::new())).await?;
        info!("server started");

        Ok(Self {
            ctx,
            deletion,
            forward,
            gateways,
            handlers,
            tasks,
            schedules,
            assistants,
            jobs,
        })
    }

    pub fn context(&self) -> &Arc<CoreContext> {
        &self.ctx
    }

    pub async fn stop(self) {
        let scheduler = Arc::clone(self.jobs.scheduler());
        self.jobs.stop();
        scheduler.shutdown().await;

        self.assistants.shutdown().await;
        self.schedules.shutdown().await;
        self.tasks.shutdown().await;
        self.gateways.shutdown().await;
        self.handlers.shutdown().await;

        self.forward.stop();
        let dropped = self.deletion.dropped();
        self.deletion.stop().await;
        if dropped > 0 {
            warn!(dropped, "deletion events were dropped while running");
        }

        close(&self.ctx).await;
        info!("server stopped");
    }
}

/// Resolve when the process is interrupted or a component asks to stop.
pub async fn wait_for_shutdown(ctx: &CoreContext) -> String {
    let (tx, mut rx) = mpsc::channel(1);
    let subscription = ctx.bus.subscribe(topic::SHUTDOWN, move |msg| {
        let tx = tx.clone();
        async move {
            let reason = msg
                .decode::<ShutdownRequest>()
                .map_or_else(|_| "shutdown requested".to_owned(), |r| r.reason);
            let _ = tx.send(reason).await;
        }
    });

    let reason = tokio::select! {
        res = tokio::signal::ctrl_c() => match res {
            Ok(()) => "interrupted".to_owned(),
            Err(e) => format!("signal handler failed: {e}"),
        },
        () = terminate() => "terminated".to_owned(),
        Some(reason) = rx.recv() => reason,
    };
    ctx.bus.unsubscribe(topic::SHUTDOWN, subscription);
    reason
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sig) => {
            sig.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

pub async fn serve(core: CoreConfig) -> Result<(), CliError> {
    let ctx = boot(core, UpgradeRegistry::new()).await?;
    let server = Server::start(Arc::clone(&ctx)).await?;
    let reason = wait_for_shutdown(server.context()).await;
    info!(%reason, "shutting down");
    server.stop().await;
    Ok(())
}
