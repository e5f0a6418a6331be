//! Tool runner lifecycle against real child processes
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use domai::config::RunnerConfig;
use domai::domain::RunnerError;
use domai::permissions::{Capability, LocalPermissions, PermissionService};
use domai::runner::{RunnerState, ToolRunner, ToolSpec};
use domai_common::EventSource;
use tokio::sync::mpsc;

fn config() -> RunnerConfig {
    RunnerConfig {
        grace_period_ms: 300,
        max_restarts: 3,
        backoff_initial_ms: 10,
        backoff_max_ms: 50,
        stable_after_secs: 30,
    }
}

fn sh(tool: EventSource, script: &str) -> ToolSpec {
    ToolSpec::custom(tool, "/bin/sh", vec!["-c".to_string(), script.to_string()], Capability::ProcessMonitor)
}

fn process_alive(pid: i32) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists()
        && std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .map(|stat| !stat.contains(") Z "))
            .unwrap_or(false)
}

#[tokio::test]
async fn test_missing_binary_leaves_runner_idle() {
    let perms = Arc::new(LocalPermissions::with_root(false));
    let spec = ToolSpec::custom(
        EventSource::Tcpdump,
        "domai-no-such-tool",
        Vec::new(),
        Capability::ProcessMonitor,
    )
    .with_search_paths(vec!["/nonexistent".into()]);
    let runner = ToolRunner::new(spec, config(), perms.clone());

    let (tx, _rx) = mpsc::channel(4);
    let err = runner.start(tx).await.unwrap_err();
    assert!(matches!(err, RunnerError::ToolNotFound { tool: EventSource::Tcpdump, .. }), "{err}");
    assert!(err.to_string().contains("/nonexistent"));
    assert_eq!(runner.state(), RunnerState::Idle);
    assert!(runner.pid().is_none());
    assert!(perms.held().is_empty());
}

#[tokio::test]
async fn test_denied_capability_leaves_runner_idle() {
    let perms = Arc::new(LocalPermissions::with_root(false));
    let spec = ToolSpec::custom(
        EventSource::Tcpdump,
        "/bin/sh",
        vec!["-c".to_string(), "sleep 30".to_string()],
        Capability::PacketCapture,
    );
    let runner = ToolRunner::new(spec, config(), perms.clone());

    let (tx, _rx) = mpsc::channel(4);
    let err = runner.start(tx).await.unwrap_err();
    assert!(matches!(err, RunnerError::PermissionDenied { capability: Capability::PacketCapture, .. }));
    assert_eq!(runner.state(), RunnerState::Idle);
    assert!(perms.held().is_empty());
}

#[tokio::test]
async fn test_rapid_start_stop_cycles_leak_nothing() {
    let perms = Arc::new(LocalPermissions::with_root(false));
    let runner = ToolRunner::new(sh(EventSource::Lsof, "echo up; sleep 30"), config(), perms.clone());

    let mut pids = Vec::new();
    for _ in 0..3 {
        let (tx, mut rx) = mpsc::channel(4);
        runner.start(tx).await.unwrap();
        assert_eq!(runner.state(), RunnerState::Running);
        let pid = runner.pid().expect("running tool has a pid");
        pids.push(i32::from(pid));
        assert_eq!(perms.held(), vec![Capability::ProcessMonitor]);
        assert_eq!(rx.recv().await.unwrap().line, "up");

        runner.stop().await;
        assert_eq!(runner.state(), RunnerState::Stopped);
        assert!(runner.pid().is_none());
        assert!(perms.held().is_empty());
    }

    // Reaped children disappear from /proc shortly after the kill
    tokio::time::sleep(Duration::from_millis(100)).await;
    for pid in pids {
        assert!(!process_alive(pid), "pid {pid} still running");
    }
    let released = perms
        .audit_log()
        .iter()
        .filter(|entry| entry.action == domai::permissions::AuditAction::Released)
        .count();
    assert_eq!(released, 3);
}

#[tokio::test]
async fn test_restart_keeps_streaming() {
    let runner = ToolRunner::new(
        sh(EventSource::Netstat, "echo tick; sleep 0.05; exit 1"),
        config(),
        Arc::new(LocalPermissions::with_root(false)),
    );
    let mut states = runner.subscribe_state();
    let (tx, mut rx) = mpsc::channel(16);
    runner.start(tx).await.unwrap();

    // One line per run: the initial one plus each restart
    for _ in 0..4 {
        let line = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(line.line, "tick");
        assert_eq!(line.tool, EventSource::Netstat);
    }

    let err = tokio::time::timeout(Duration::from_secs(5), runner.wait()).await.unwrap().unwrap_err();
    assert!(matches!(err, RunnerError::ProcessCrashed { attempts: 4, .. }), "{err}");
    assert_eq!(*states.borrow_and_update(), RunnerState::Failed);

    // Failed runners can be started again
    let (tx, _rx) = mpsc::channel(16);
    runner.start(tx).await.unwrap();
    runner.stop().await;
    assert_eq!(runner.state(), RunnerState::Stopped);
}

#[tokio::test]
async fn test_stop_on_idle_runner() {
    let service: Arc<dyn PermissionService> = Arc::new(LocalPermissions::with_root(false));
    let runner = ToolRunner::new(sh(EventSource::Lsof, "true"), config(), service);
    runner.stop().await;
    assert_eq!(runner.state(), RunnerState::Stopped);
}
