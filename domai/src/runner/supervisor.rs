#![allow(unsafe_code)] // kill() on the child's process group

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use domai_common::EventSource;
use log::{debug, error, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::{RawLine, RunnerState, ToolSpec};
use crate::config::RunnerConfig;
use crate::domain::{Pid, RunnerError};
use crate::permissions::{GrantGuard, PermissionService};
use crate::preflight;

/// Upper bound on reading leftover output after the process is gone
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Supervises one external tool process
///
/// All methods take `&self`; `start` and `stop` are serialized internally, so
/// a `stop` racing an in-flight `start` waits for it and then tears the new
/// process down.
pub struct ToolRunner {
    spec: ToolSpec,
    config: RunnerConfig,
    permissions: Arc<dyn PermissionService>,
    shared: Arc<Shared>,
    lifecycle: tokio::sync::Mutex<Option<Active>>,
}

/// State visible to both the runner handle and its supervisor task
struct Shared {
    state: watch::Sender<RunnerState>,
    failure: Mutex<Option<RunnerError>>,
    pid: AtomicU32,
}

impl Shared {
    fn set_state(&self, tool: EventSource, next: RunnerState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!("{tool}: {prev} -> {next}");
        }
    }

    fn failure(&self) -> MutexGuard<'_, Option<RunnerError>> {
        self.failure.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

struct Active {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ToolRunner {
    #[must_use]
    pub fn new(spec: ToolSpec, config: RunnerConfig, permissions: Arc<dyn PermissionService>) -> Self {
        let (state, _) = watch::channel(RunnerState::Idle);
        Self {
            spec,
            config,
            permissions,
            shared: Arc::new(Shared { state, failure: Mutex::new(None), pid: AtomicU32::new(0) }),
            lifecycle: tokio::sync::Mutex::new(None),
        }
    }

    #[must_use]
    pub fn tool(&self) -> EventSource {
        self.spec.tool
    }

    #[must_use]
    pub fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    #[must_use]
    pub fn state(&self) -> RunnerState {
        *self.shared.state.borrow()
    }

    /// Watch lifecycle transitions
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<RunnerState> {
        self.shared.state.subscribe()
    }

    /// Pid of the current child process, if one is alive
    #[must_use]
    pub fn pid(&self) -> Option<Pid> {
        match self.shared.pid.load(Ordering::Relaxed) {
            0 => None,
            pid => Some(Pid(pid)),
        }
    }

    /// Launch the tool and stream its stdout into `lines`
    ///
    /// On error nothing is left running, no grant is held, and the state is
    /// unchanged.
    ///
    /// # Errors
    /// `AlreadyRunning`, `ToolNotFound`, `PermissionDenied`, or `Spawn`.
    pub async fn start(&self, lines: mpsc::Sender<RawLine>) -> Result<(), RunnerError> {
        let tool = self.spec.tool;
        let mut active = self.lifecycle.lock().await;
        if active.as_ref().is_some_and(|a| !a.task.is_finished()) {
            return Err(RunnerError::AlreadyRunning(tool));
        }

        let program = preflight::resolve_tool(&self.spec)?;
        let grant = GrantGuard::acquire(Arc::clone(&self.permissions), self.spec.capability)
            .ok_or(RunnerError::PermissionDenied { tool, capability: self.spec.capability })?;
        let child = spawn_child(&program, &self.spec.args)
            .map_err(|source| RunnerError::Spawn { program: program.clone(), source })?;

        *self.shared.failure() = None;
        self.shared.set_state(tool, RunnerState::Running);
        info!("Started {} ({})", tool, self.spec.command_line());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let supervisor = Supervisor {
            tool,
            program,
            args: self.spec.args.clone(),
            config: self.config.clone(),
            shared: Arc::clone(&self.shared),
            lines,
        };
        let task = tokio::spawn(supervisor.run(child, shutdown_rx, grant));
        *active = Some(Active { shutdown: shutdown_tx, task });
        Ok(())
    }

    /// Terminate the tool: SIGTERM, grace period, then SIGKILL
    ///
    /// Always ends in `Stopped` with the grant released, whatever state the
    /// runner was in.
    pub async fn stop(&self) {
        let tool = self.spec.tool;
        let mut active = self.lifecycle.lock().await;
        if let Some(Active { shutdown, task }) = active.take() {
            if !task.is_finished() {
                self.shared.set_state(tool, RunnerState::Stopping);
            }
            // Err only means the supervisor already exited
            let _ = shutdown.send(true);
            if let Err(e) = task.await {
                error!("{tool} supervisor task ended abnormally: {e}");
            }
            info!("Stopped {tool}");
        }
        self.shared.pid.store(0, Ordering::Relaxed);
        self.shared.set_state(tool, RunnerState::Stopped);
    }

    /// Wait until the runner settles
    ///
    /// # Errors
    /// `ProcessCrashed` when the supervisor gave up restarting the tool.
    pub async fn wait(&self) -> Result<(), RunnerError> {
        let mut rx = self.shared.state.subscribe();
        // The sender lives in `self`, so this only returns once settled
        let _ = rx.wait_for(|state| state.is_settled()).await;
        match self.shared.failure().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for ToolRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRunner")
            .field("tool", &self.spec.tool)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Supervisor task
// ============================================================================

enum ChildOutcome {
    /// Stop was requested (or the runner was dropped)
    Shutdown,
    /// The process exited on its own
    Exited(String),
}

struct Supervisor {
    tool: EventSource,
    program: PathBuf,
    args: Vec<String>,
    config: RunnerConfig,
    shared: Arc<Shared>,
    lines: mpsc::Sender<RawLine>,
}

impl Supervisor {
    async fn run(self, first: Child, mut shutdown: watch::Receiver<bool>, grant: GrantGuard) {
        let mut next = Some(Ok(first));
        let mut crashes: u32 = 0;

        loop {
            let spawned = next.take().unwrap_or_else(|| spawn_child(&self.program, &self.args));
            let started = Instant::now();
            let last_status = match spawned {
                Ok(child) => match self.run_child(child, &mut shutdown).await {
                    ChildOutcome::Shutdown => break,
                    ChildOutcome::Exited(status) => status,
                },
                Err(e) => format!("spawn failed: {e}"),
            };

            if started.elapsed() >= self.config.stable_after() {
                crashes = 0;
            }
            crashes += 1;

            if crashes > self.config.max_restarts {
                error!("{} crashed {crashes} times, giving up (last exit: {last_status})", self.tool);
                drop(grant);
                *self.shared.failure() = Some(RunnerError::ProcessCrashed {
                    tool: self.tool,
                    attempts: crashes,
                    last_status,
                });
                self.shared.set_state(self.tool, RunnerState::Failed);
                return;
            }

            let delay = self.config.backoff(crashes);
            warn!(
                "{} exited unexpectedly ({last_status}); restart {crashes}/{} in {delay:?}",
                self.tool, self.config.max_restarts
            );
            self.shared.set_state(self.tool, RunnerState::Restarting { attempt: crashes });

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
            self.shared.set_state(self.tool, RunnerState::Running);
        }

        drop(grant);
    }

    /// Pump one child's stdout until it exits or shutdown is requested
    async fn run_child(&self, mut child: Child, shutdown: &mut watch::Receiver<bool>) -> ChildOutcome {
        self.shared.pid.store(child.id().unwrap_or(0), Ordering::Relaxed);
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(self.tool, stderr));
        }
        let Some(stdout) = child.stdout.take() else {
            self.terminate(&mut child).await;
            return ChildOutcome::Exited("stdout unavailable".to_string());
        };

        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        loop {
            tokio::select! {
                read = reader.read_until(b'\n', &mut buf) => match read {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = self.raw_line(&buf);
                        buf.clear();
                        if !self.forward(line, shutdown).await {
                            return self.shut_down(&mut child, &mut reader, &mut buf).await;
                        }
                    }
                    Err(e) => {
                        warn!("{} stdout read failed: {e}", self.tool);
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    return self.shut_down(&mut child, &mut reader, &mut buf).await;
                }
            }
        }

        if !buf.is_empty() {
            let line = self.raw_line(&buf);
            let _ = self.lines.send(line).await;
        }

        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => ChildOutcome::Exited(status.to_string()),
                Err(e) => ChildOutcome::Exited(format!("wait failed: {e}")),
            },
            _ = shutdown.changed() => {
                self.terminate(&mut child).await;
                ChildOutcome::Shutdown
            }
        };
        self.shared.pid.store(0, Ordering::Relaxed);
        outcome
    }

    /// Send one line downstream; `false` when shutdown interrupted or the
    /// consumer is gone
    async fn forward(&self, line: RawLine, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            sent = self.lines.send(line) => sent.is_ok(),
            _ = shutdown.changed() => false,
        }
    }

    async fn shut_down(
        &self,
        child: &mut Child,
        reader: &mut BufReader<ChildStdout>,
        buf: &mut Vec<u8>,
    ) -> ChildOutcome {
        self.terminate(child).await;
        self.drain(reader, buf).await;
        ChildOutcome::Shutdown
    }

    async fn terminate(&self, child: &mut Child) {
        let Some(pid) = child.id() else {
            return;
        };
        let grace = self.config.grace_period();
        signal_group(Pid(pid), libc::SIGTERM);

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => debug!("{} exited after SIGTERM ({status})", self.tool),
            Ok(Err(e)) => warn!("{} wait failed: {e}", self.tool),
            Err(_) => {
                warn!("{} ignored SIGTERM for {grace:?}, sending SIGKILL", self.tool);
                signal_group(Pid(pid), libc::SIGKILL);
                if let Err(e) = child.kill().await {
                    debug!("{} kill: {e}", self.tool);
                }
            }
        }
        self.shared.pid.store(0, Ordering::Relaxed);
    }

    /// Forward whatever the process wrote before it died
    async fn drain(&self, reader: &mut BufReader<ChildStdout>, buf: &mut Vec<u8>) {
        let drained = async {
            loop {
                match reader.read_until(b'\n', buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let line = self.raw_line(buf);
                        buf.clear();
                        if self.lines.send(line).await.is_err() {
                            return;
                        }
                    }
                }
            }
            if !buf.is_empty() {
                let line = self.raw_line(buf);
                let _ = self.lines.send(line).await;
            }
        };
        if tokio::time::timeout(DRAIN_TIMEOUT, drained).await.is_err() {
            debug!("{}: output drain timed out", self.tool);
        }
    }

    fn raw_line(&self, bytes: &[u8]) -> RawLine {
        let text = String::from_utf8_lossy(bytes);
        RawLine {
            tool: self.tool,
            line: text.trim_end_matches(['\n', '\r']).to_string(),
            received_at: Utc::now(),
        }
    }
}

fn spawn_child(program: &Path, args: &[String]) -> std::io::Result<Child> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own process group, so termination reaches anything the tool forks
    #[cfg(unix)]
    cmd.process_group(0);
    cmd.spawn()
}

fn signal_group(pid: Pid, signal: libc::c_int) {
    let pgid = i32::from(pid);
    if unsafe { libc::kill(-pgid, signal) } != 0 {
        // Group already gone; fall back to the leader alone
        unsafe {
            libc::kill(pgid, signal);
        }
    }
}

async fn log_stderr(tool: EventSource, stderr: impl AsyncRead + Unpin) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("{tool} stderr: {line}");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::permissions::{Capability, LocalPermissions};

    fn sh(script: &str) -> ToolSpec {
        ToolSpec::custom(
            EventSource::Lsof,
            "/bin/sh",
            vec!["-c".to_string(), script.to_string()],
            Capability::ProcessMonitor,
        )
    }

    fn fast_config() -> RunnerConfig {
        RunnerConfig {
            grace_period_ms: 500,
            max_restarts: 2,
            backoff_initial_ms: 10,
            backoff_max_ms: 20,
            stable_after_secs: 30,
        }
    }

    #[tokio::test]
    async fn test_lines_arrive_in_order() {
        let runner = ToolRunner::new(
            sh("echo one; echo two; echo three; sleep 30"),
            fast_config(),
            Arc::new(LocalPermissions::with_root(false)),
        );
        let (tx, mut rx) = mpsc::channel(16);
        runner.start(tx).await.unwrap();

        let mut got = Vec::new();
        for _ in 0..3 {
            got.push(rx.recv().await.unwrap().line);
        }
        assert_eq!(got, vec!["one", "two", "three"]);

        runner.stop().await;
        assert_eq!(runner.state(), RunnerState::Stopped);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let runner = ToolRunner::new(
            sh("sleep 30"),
            fast_config(),
            Arc::new(LocalPermissions::with_root(false)),
        );
        let (tx, _rx) = mpsc::channel(16);
        runner.start(tx.clone()).await.unwrap();
        let err = runner.start(tx).await.unwrap_err();
        assert!(matches!(err, RunnerError::AlreadyRunning(EventSource::Lsof)));
        runner.stop().await;
    }

    #[tokio::test]
    async fn test_crash_loop_fails_and_releases_grant() {
        let perms = Arc::new(LocalPermissions::with_root(false));
        let runner = ToolRunner::new(sh("exit 3"), fast_config(), perms.clone());
        let (tx, _rx) = mpsc::channel(16);
        runner.start(tx).await.unwrap();

        let err = runner.wait().await.unwrap_err();
        match err {
            RunnerError::ProcessCrashed { attempts, last_status, .. } => {
                assert_eq!(attempts, 3);
                assert!(last_status.contains('3'));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(runner.state(), RunnerState::Failed);
        assert!(perms.held().is_empty());
    }

    #[tokio::test]
    async fn test_sigterm_ignored_escalates_to_kill() {
        let runner = ToolRunner::new(
            sh("trap '' TERM; echo ready; while true; do sleep 1; done"),
            RunnerConfig { grace_period_ms: 100, ..fast_config() },
            Arc::new(LocalPermissions::with_root(false)),
        );
        let (tx, mut rx) = mpsc::channel(16);
        runner.start(tx).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().line, "ready");

        tokio::time::timeout(Duration::from_secs(5), runner.stop()).await.unwrap();
        assert_eq!(runner.state(), RunnerState::Stopped);
        assert!(runner.pid().is_none());
    }
}
