// ── External command runner ──
//
// Runs a child process with a hard timeout. While the child runs, a
// status callback fires every `status_update`; when it ends, the outcome
// is reported as exited, timed out (child killed) or failed to run.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_STATUS_UPDATE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitType {
    /// The child ended on its own with this exit code.
    Exited(i32),
    /// The timeout elapsed and the child was killed.
    Timeout,
    /// The child could not be started or waited on, or died by signal.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct RunStatus {
    pub name: String,
    pub pid: Option<u32>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub exit: ExitType,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl RunOutput {
    fn failed(reason: String, started: Instant) -> Self {
        Self {
            exit: ExitType::Failed(reason),
            stdout: String::new(),
            stderr: String::new(),
            elapsed: started.elapsed(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandRunner {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub dir: Option<PathBuf>,
    /// Zero disables the timeout.
    pub timeout: Duration,
    /// Zero disables status callbacks.
    pub status_update: Duration,
}

impl CommandRunner {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            dir: None,
            timeout: DEFAULT_TIMEOUT,
            status_update: DEFAULT_STATUS_UPDATE,
        }
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn status_update(mut self, every: Duration) -> Self {
        self.status_update = every;
        self
    }

    /// Run to completion, calling `on_status` while the child is alive.
    pub async fn run(&self, mut on_status: impl FnMut(&RunStatus) + Send) -> RunOutput {
        let started = Instant::now();
        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.dir {
            command.current_dir(dir);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(name = %self.name, command = %self.command, error = %e, "command failed to start");
                return RunOutput::failed(e.to_string(), started);
            }
        };
        let pid = child.id();
        debug!(name = %self.name, pid, "command started");

        let stdout = tokio::spawn(read_all(child.stdout.take()));
        let stderr = tokio::spawn(read_all(child.stderr.take()));

        let has_timeout = !self.timeout.is_zero();
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let has_status = !self.status_update.is_zero();
        let mut ticker = tokio::time::interval(self.status_update.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await; // consume the immediate first tick

        let exit = loop {
            tokio::select! {
                biased;
                status = child.wait() => break match status {
                    Ok(status) => status.code().map_or_else(
                        || ExitType::Failed(format!("terminated by signal ({status})")),
                        ExitType::Exited,
                    ),
                    Err(e) => ExitType::Failed(e.to_string()),
                },
                () = &mut deadline, if has_timeout => {
                    warn!(name = %self.name, timeout = ?self.timeout, "command timed out, killing");
                    if let Err(e) = child.kill().await {
                        warn!(name = %self.name, error = %e, "kill failed");
                    }
                    break ExitType::Timeout;
                }
                _ = ticker.tick(), if has_status => on_status(&RunStatus {
                    name: self.name.clone(),
                    pid,
                    elapsed: started.elapsed(),
                }),
            }
        };

        let output = RunOutput {
            exit,
            stdout: stdout.await.unwrap_or_default(),
            stderr: stderr.await.unwrap_or_default(),
            elapsed: started.elapsed(),
        };
        debug!(name = %self.name, exit = ?output.exit, elapsed = ?output.elapsed, "command finished");
        output
    }

    /// Run in the background and hand the outcome to `on_exit`.
    pub fn spawn<S, E>(self, on_status: S, on_exit: E) -> JoinHandle<()>
    where
        S: FnMut(&RunStatus) + Send + 'static,
        E: FnOnce(RunOutput) + Send + 'static,
    {
        tokio::spawn(async move {
            let output = self.run(on_status).await;
            on_exit(output);
        })
    }
}

async fn read_all<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = pipe.read_to_end(&mut buf).await {
        debug!(error = %e, "reading child output failed");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn captures_exit_code_and_output() {
        let runner = CommandRunner::new("echo", "sh")
            .args(["-c", "echo hello; echo oops >&2; exit 3"])
            .env("MC_TEST", "1");
        let output = runner.run(|_| {}).await;
        assert_eq!(output.exit, ExitType::Exited(3));
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn passes_environment() {
        let output = CommandRunner::new("env", "sh")
            .args(["-c", "printf %s \"$MC_VALUE\""])
            .env("MC_VALUE", "42")
            .run(|_| {})
            .await;
        assert_eq!(output.exit, ExitType::Exited(0));
        assert_eq!(output.stdout, "42");
    }

    #[tokio::test]
    async fn timeout_kills_child() {
        let output = CommandRunner::new("sleeper", "sleep")
            .args(["5"])
            .timeout(Duration::from_millis(200))
            .run(|_| {})
            .await;
        assert_eq!(output.exit, ExitType::Timeout);
        assert!(output.elapsed < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn status_updates_while_running() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let output = CommandRunner::new("sleeper", "sleep")
            .args(["1"])
            .status_update(Duration::from_millis(150))
            .run(move |status| {
                assert_eq!(status.name, "sleeper");
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert_eq!(output.exit, ExitType::Exited(0));
        assert!(ticks.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn missing_binary_fails() {
        let output = CommandRunner::new("ghost", "/nonexistent/mc-binary")
            .run(|_| {})
            .await;
        assert!(matches!(output.exit, ExitType::Failed(_)));
    }

    #[tokio::test]
    async fn spawn_reports_exit() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = CommandRunner::new("true", "true").spawn(
            |_| {},
            move |output| {
                let _ = tx.send(output.exit);
            },
        );
        handle.await.unwrap();
        assert_eq!(rx.await.unwrap(), ExitType::Exited(0));
    }
}
