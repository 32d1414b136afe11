//! Lifecycle of the external agent runtime process.
//!
//! The supervisor owns at most one child process. Readiness is detected by
//! scanning the child's output for a known marker line; both streams are
//! relayed into the log for the life of the process.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use conduit_core::config::AppConfig;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl RuntimeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RuntimeStatus {
    pub state: RuntimeState,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("runtime startup config not found at {}", .0.display())]
    ConfigMissing(PathBuf),
    #[error("runtime is already {}", .0.as_str())]
    AlreadyRunning(RuntimeState),
    #[error("failed to spawn runtime command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("runtime exited before reporting readiness (exit code {code:?})")]
    RuntimeExited { code: Option<i32> },
    #[error("runtime did not report readiness within {0:?}")]
    RuntimeStartupTimeout(Duration),
    #[error("failed to signal runtime process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Clone, Debug)]
pub struct SupervisorSettings {
    pub root: PathBuf,
    pub startup_config: PathBuf,
    pub command: String,
    pub args: Vec<String>,
    pub ready_markers: Vec<String>,
    pub startup_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub probe_url: String,
}

impl SupervisorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            root: config.runtime.root.clone(),
            startup_config: config.runtime.startup_config_path(),
            command: config.runtime.command.clone(),
            args: config.runtime.args.clone(),
            ready_markers: config.runtime.ready_markers.clone(),
            startup_timeout: config.runtime.startup_timeout(),
            shutdown_timeout: config.runtime.shutdown_timeout(),
            probe_url: format!("{}/agents", config.channel.api_base_url.trim_end_matches('/')),
        }
    }
}

#[derive(Debug)]
struct SupervisedProcess {
    state: RuntimeState,
    child: Option<Child>,
    pid: Option<u32>,
    started_at: Option<DateTime<Utc>>,
}

pub struct RuntimeSupervisor {
    settings: SupervisorSettings,
    process: Mutex<SupervisedProcess>,
    client: reqwest::Client,
}

impl RuntimeSupervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        Self {
            settings,
            process: Mutex::new(SupervisedProcess {
                state: RuntimeState::Stopped,
                child: None,
                pid: None,
                started_at: None,
            }),
            client: reqwest::Client::new(),
        }
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Spawns the runtime and waits until it reports readiness.
    ///
    /// The startup config file is checked before anything is spawned. A child
    /// that misses the readiness deadline is killed and the supervisor ends in
    /// [`RuntimeState::Failed`].
    pub async fn start(&self) -> Result<(), SupervisorError> {
        let (pid, ready_rx) = {
            let mut process = self.process.lock().await;
            if matches!(
                process.state,
                RuntimeState::Starting | RuntimeState::Running | RuntimeState::Stopping
            ) {
                return Err(SupervisorError::AlreadyRunning(process.state));
            }

            let config_present =
                tokio::fs::try_exists(&self.settings.startup_config).await.unwrap_or(false);
            if !config_present {
                return Err(SupervisorError::ConfigMissing(self.settings.startup_config.clone()));
            }

            let mut command = Command::new(&self.settings.command);
            command
                .args(&self.settings.args)
                .current_dir(&self.settings.root)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            // The runtime leads its own group so signals reach wrapper children too.
            #[cfg(unix)]
            command.process_group(0);

            let mut child = match command.spawn() {
                Ok(child) => child,
                Err(source) => {
                    process.state = RuntimeState::Failed;
                    return Err(SupervisorError::Spawn {
                        command: self.settings.command.clone(),
                        source,
                    });
                }
            };

            let pid = child.id();
            let markers: Arc<[String]> = Arc::from(self.settings.ready_markers.clone());
            let (ready_tx, ready_rx) = mpsc::unbounded_channel();
            if let Some(stdout) = child.stdout.take() {
                relay_output(stdout, "stdout", pid, Arc::clone(&markers), ready_tx.clone());
            }
            if let Some(stderr) = child.stderr.take() {
                relay_output(stderr, "stderr", pid, markers, ready_tx);
            }

            process.state = RuntimeState::Starting;
            process.child = Some(child);
            process.pid = pid;
            process.started_at = None;
            (pid, ready_rx)
        };

        info!(
            event_name = "supervisor.spawned",
            pid,
            command = %self.settings.command,
            root = %self.settings.root.display(),
            "runtime process spawned"
        );
        self.await_ready(pid, ready_rx).await
    }

    async fn await_ready(
        &self,
        pid: Option<u32>,
        mut ready_rx: mpsc::UnboundedReceiver<String>,
    ) -> Result<(), SupervisorError> {
        let deadline = tokio::time::sleep(self.settings.startup_timeout);
        tokio::pin!(deadline);
        let mut exit_poll = tokio::time::interval(EXIT_POLL_INTERVAL);
        let mut streams_open = true;

        loop {
            tokio::select! {
                line = ready_rx.recv(), if streams_open => match line {
                    Some(line) => {
                        let mut process = self.process.lock().await;
                        if process.pid == pid && process.state == RuntimeState::Starting {
                            process.state = RuntimeState::Running;
                            process.started_at = Some(Utc::now());
                        }
                        info!(event_name = "supervisor.ready", pid, marker_line = %line, "runtime ready");
                        return Ok(());
                    }
                    // Output closed without a marker; the exit poll reports the code.
                    None => streams_open = false,
                },
                _ = exit_poll.tick() => {
                    if let Some(code) = self.exited_while_starting(pid).await {
                        warn!(event_name = "supervisor.exited_early", pid, code, "runtime exited before ready");
                        return Err(SupervisorError::RuntimeExited { code });
                    }
                }
                _ = &mut deadline => {
                    if let Some(mut child) = self.take_child_if_starting(pid).await {
                        if let Err(error) = kill(&mut child, pid).await {
                            warn!(pid, error = %error, "failed to kill unready runtime");
                        }
                    }
                    warn!(
                        event_name = "supervisor.startup_timeout",
                        pid,
                        timeout_secs = self.settings.startup_timeout.as_secs(),
                        "runtime missed readiness deadline"
                    );
                    return Err(SupervisorError::RuntimeStartupTimeout(self.settings.startup_timeout));
                }
            }
        }
    }

    /// Reaps a child that exited during startup and clears out whatever it left
    /// behind in its process group. Returns `Some(code)` once the child is gone.
    async fn exited_while_starting(&self, pid: Option<u32>) -> Option<Option<i32>> {
        let mut process = self.process.lock().await;
        if process.pid != pid || process.state != RuntimeState::Starting {
            return None;
        }
        let status = match process.child.as_mut().map(Child::try_wait) {
            Some(Ok(Some(status))) => status,
            Some(Ok(None)) | None => return None,
            Some(Err(error)) => {
                debug!(pid, error = %error, "polling runtime exit failed");
                return None;
            }
        };

        process.state = RuntimeState::Stopped;
        process.pid = None;
        process.child = None;
        drop(process);
        kill_stragglers(pid);
        Some(status.code())
    }

    /// Takes the child away from a start that is still in progress and marks the
    /// supervisor failed. Returns `None` when a concurrent stop already took it.
    async fn take_child_if_starting(&self, pid: Option<u32>) -> Option<Child> {
        let mut process = self.process.lock().await;
        if process.pid != pid || process.state != RuntimeState::Starting {
            return None;
        }
        process.state = RuntimeState::Failed;
        process.pid = None;
        process.child.take()
    }

    /// Asks the runtime to exit, then kills it after the grace period. Calling
    /// this without a running child is a no-op.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let (child, pid) = {
            let mut process = self.process.lock().await;
            match process.child.take() {
                Some(child) => {
                    process.state = RuntimeState::Stopping;
                    (child, process.pid)
                }
                None => {
                    process.state = RuntimeState::Stopped;
                    process.pid = None;
                    process.started_at = None;
                    return Ok(());
                }
            }
        };

        let result = self.terminate(child, pid).await;

        let mut process = self.process.lock().await;
        process.state = RuntimeState::Stopped;
        process.pid = None;
        process.started_at = None;
        info!(event_name = "supervisor.stopped", pid, "runtime stopped");
        result
    }

    pub async fn restart(&self) -> Result<(), SupervisorError> {
        self.stop().await?;
        self.start().await
    }

    pub async fn status(&self) -> RuntimeStatus {
        let mut process = self.process.lock().await;
        if process.state == RuntimeState::Running {
            let exited = process.child.as_mut().and_then(|child| child.try_wait().ok().flatten());
            if let Some(exit) = exited {
                warn!(
                    event_name = "supervisor.exited",
                    pid = process.pid,
                    code = exit.code(),
                    "runtime exited unexpectedly"
                );
                kill_stragglers(process.pid);
                process.child = None;
                process.pid = None;
                process.state = RuntimeState::Failed;
            }
        }
        RuntimeStatus { state: process.state, pid: process.pid, started_at: process.started_at }
    }

    pub async fn is_running(&self) -> bool {
        self.status().await.state == RuntimeState::Running
    }

    /// Pings the runtime's HTTP API; any 2xx counts as available.
    pub async fn check_availability(&self) -> bool {
        match self.client.get(&self.settings.probe_url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                debug!(url = %self.settings.probe_url, error = %error, "runtime probe failed");
                false
            }
        }
    }

    async fn terminate(&self, mut child: Child, pid: Option<u32>) -> Result<(), SupervisorError> {
        request_shutdown(&mut child);

        match tokio::time::timeout(self.settings.shutdown_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(pid, code = status.code(), "runtime exited after shutdown request");
                kill_stragglers(pid);
                Ok(())
            }
            Ok(Err(error)) => {
                warn!(pid, error = %error, "waiting on runtime failed, killing");
                kill(&mut child, pid).await
            }
            Err(_) => {
                warn!(
                    event_name = "supervisor.force_kill",
                    pid,
                    grace_secs = self.settings.shutdown_timeout.as_secs(),
                    "runtime ignored shutdown request, killing"
                );
                kill(&mut child, pid).await
            }
        }
    }
}

async fn kill(child: &mut Child, pid: Option<u32>) -> Result<(), SupervisorError> {
    kill_stragglers(pid);
    match child.try_wait() {
        Ok(Some(_)) => Ok(()),
        _ => child
            .kill()
            .await
            .map_err(|source| SupervisorError::Signal { pid: pid.unwrap_or_default(), source }),
    }
}

#[cfg(unix)]
fn request_shutdown(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    if let Err(error) = signal_group(pid, libc::SIGTERM) {
        debug!(pid, error = %error, "SIGTERM delivery failed");
        let _ = child.start_kill();
    }
}

#[cfg(not(unix))]
fn request_shutdown(child: &mut Child) {
    if let Err(error) = child.start_kill() {
        debug!(error = %error, "runtime kill request failed");
    }
}

/// Force-kills anything still running in the runtime's process group.
#[cfg(unix)]
fn kill_stragglers(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    match signal_group(pid, libc::SIGKILL) {
        Ok(()) => debug!(pid, "killed leftover runtime processes"),
        Err(error) if error.raw_os_error() == Some(libc::ESRCH) => {}
        Err(error) => debug!(pid, error = %error, "process group kill failed"),
    }
}

#[cfg(not(unix))]
fn kill_stragglers(_pid: Option<u32>) {}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) -> std::io::Result<()> {
    let raw_pid = libc::pid_t::try_from(pid)
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
    // SAFETY: the child was spawned with `process_group(0)`, so its pid is the
    // group id and the negative value addresses only that group.
    let rc = unsafe { libc::kill(-raw_pid, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

fn relay_output<R>(
    reader: R,
    stream: &'static str,
    pid: Option<u32>,
    markers: Arc<[String]>,
    ready_tx: mpsc::UnboundedSender<String>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    debug!(event_name = "runtime.output", stream, pid, "{line}");
                    if markers.iter().any(|marker| line.contains(marker.as_str())) {
                        let _ = ready_tx.send(line);
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    debug!(stream, pid, error = %error, "runtime output stream closed");
                    break;
                }
            }
        }
    });
}
