// ── Named job scheduler ──
//
// One tokio task per job. Adding a job under an existing name replaces
// it, so reloading a configuration is just "add everything again".

use std::future::Future;
use std::sync::Arc;

use chrono::Local;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cron::{CronError, CronSchedule};

pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct RunningJob {
    schedule: CronSchedule,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct Scheduler {
    jobs: DashMap<String, RunningJob>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `job` under `name`, replacing any job with that name.
    pub fn add<F, Fut>(&self, name: &str, schedule: CronSchedule, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let job: JobFn = Arc::new(move || Box::pin(job()));
        self.remove(name);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(
            name.to_owned(),
            schedule.clone(),
            job,
            cancel.clone(),
        ));
        info!(job = name, schedule = %schedule, "job scheduled");
        self.jobs.insert(
            name.to_owned(),
            RunningJob {
                schedule,
                cancel,
                handle,
            },
        );
    }

    pub fn add_expr<F, Fut>(&self, name: &str, expr: &str, job: F) -> Result<(), CronError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.add(name, expr.parse()?, job);
        Ok(())
    }

    /// Cancel a job. A run in progress is interrupted at its next await.
    pub fn remove(&self, name: &str) -> bool {
        let Some((_, job)) = self.jobs.remove(name) else {
            return false;
        };
        job.cancel.cancel();
        debug!(job = name, "job removed");
        true
    }

    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let names: Vec<String> = self
            .jobs
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        names.iter().filter(|name| self.remove(name)).count()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    pub fn schedule_of(&self, name: &str) -> Option<CronSchedule> {
        self.jobs.get(name).map(|job| job.schedule.clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        names
    }

    /// Cancel every job and wait for the tasks to finish.
    pub async fn shutdown(&self) {
        let names = self.names();
        let mut handles = Vec::with_capacity(names.len());
        for name in names {
            if let Some((_, job)) = self.jobs.remove(&name) {
                job.cancel.cancel();
                handles.push(job.handle);
            }
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn run(name: String, schedule: CronSchedule, job: JobFn, cancel: CancellationToken) {
    if let Some(period) = schedule.interval() {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            if !fire(&name, &job, &cancel).await {
                break;
            }
        }
        return;
    }

    loop {
        let now = Local::now();
        let Some(next) = schedule.next_after(&now) else {
            warn!(job = %name, schedule = %schedule, "schedule never fires again");
            break;
        };
        let wait = (next - now).to_std().unwrap_or_default();
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(wait) => {}
        }
        if !fire(&name, &job, &cancel).await {
            break;
        }
    }
}

/// Run one execution; false when cancelled mid-run.
async fn fire(name: &str, job: &JobFn, cancel: &CancellationToken) -> bool {
    debug!(job = name, "job firing");
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = job() => true,
    }
}
