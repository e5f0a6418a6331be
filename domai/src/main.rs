//! # domai - Main Entry Point
//!
//! Supports two operational modes:
//! - **Live TUI** (default): crisis and knowledge streams side by side
//! - **Headless** (`--headless`): both streams printed to stdout, optionally
//!   exported as JSON lines with `--export`

#![allow(clippy::too_many_lines)]

use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, Sender, TrySendError};
use domai_common::{Severity, StreamKind};
use log::{info, warn};
use tokio::sync::mpsc;

use domai::cli::Args;
use domai::dispatch::{Envelope, SubscribeOptions, Subscription};
use domai::domain::{ConfigError, RunnerError, SessionId};
use domai::export::EventExporter;
use domai::monitor::Monitor;
use domai::permissions::{LocalPermissions, PermissionService};
use domai::preflight::run_preflight_checks;
use domai::profile::{JsonProfileStore, ProfileStore, UserProfile};
use domai::render::{self, RenderOptions};
use domai::runner::ToolSpec;
use domai::session::SessionManager;
use domai::{config::MonitorConfig, tui};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;
const EXIT_NOT_FOUND: i32 = 127;

/// Envelopes taken from a subscription per wakeup
const BATCH_SIZE: usize = 64;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(runner_err) = cause.downcast_ref::<RunnerError>() {
            return match runner_err {
                RunnerError::ToolNotFound { .. } => EXIT_NOT_FOUND,
                RunnerError::PermissionDenied { .. } => EXIT_NOPERM,
                RunnerError::InvalidArgument { .. } => EXIT_USAGE,
                _ => EXIT_ERROR,
            };
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return EXIT_USAGE;
        }
    }
    EXIT_ERROR
}

/// Where consumed envelopes go besides the export file
enum Sink {
    Headless { sessions: Arc<SessionManager>, session: SessionId },
    Tui(Sender<Envelope>),
}

#[derive(Debug, Default)]
struct ForwardStats {
    crisis: u64,
    knowledge: u64,
    exported: u64,
    /// Envelopes the TUI was too slow to take
    tui_dropped: u64,
}

fn load_profile(args: &Args) -> Result<(Option<JsonProfileStore>, UserProfile)> {
    let Some(ref dir) = args.profile_dir else {
        return Ok((None, UserProfile::new(args.profile.clone(), domai_common::Tier::Novice)));
    };
    let store = JsonProfileStore::new(dir);
    let profile = store
        .load(&args.profile)
        .with_context(|| format!("Failed to load profile '{}'", args.profile))?
        .unwrap_or_else(|| {
            info!("Creating profile '{}' in {}", args.profile, dir.display());
            UserProfile::new(args.profile.clone(), domai_common::Tier::Novice)
        });
    Ok((Some(store), profile))
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;

    let mut config = match args.config {
        Some(ref path) => MonitorConfig::from_file(path)?,
        None => MonitorConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    let (store, profile) = load_profile(&args)?;
    let tier = render::select_tier(&profile, args.tier);
    let min_severity = args.min_severity.unwrap_or(profile.preferences.notification_threshold);
    let render_opts = RenderOptions::for_profile(&profile);

    let permissions: Arc<dyn PermissionService> = Arc::new(LocalPermissions::new());
    let tools = args.unique_tools();
    let specs = tools
        .iter()
        .map(|tool| ToolSpec::for_tool(*tool, &config.tools))
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid tool arguments")?;
    run_preflight_checks(&specs, permissions.as_ref(), quiet)?;

    if !quiet {
        println!("domai v{}", env!("CARGO_PKG_VERSION"));
        for spec in &specs {
            println!("tool: {}", spec.command_line());
        }
        println!("profile: {} (tier {tier}, alerts from {min_severity})", profile.id);
    }

    let exporter = args
        .export
        .as_ref()
        .map(|path| {
            EventExporter::create(path)
                .with_context(|| format!("Failed to create export file {}", path.display()))
        })
        .transpose()?;
    if !quiet {
        if let Some(ref path) = args.export {
            println!("export: {}", path.display());
        }
    }

    let monitor = Monitor::new(config, permissions);
    let session = monitor.sessions().open(profile);
    let crisis = monitor.dispatcher().subscribe(
        StreamKind::Crisis,
        SubscribeOptions { tier, min_severity, capacity: None, render: render_opts },
    );
    let knowledge = Arc::new(monitor.dispatcher().subscribe(
        StreamKind::Knowledge,
        SubscribeOptions { tier, min_severity: Severity::Info, capacity: None, render: render_opts },
    ));

    // Tools start before the TUI takes over the terminal
    for spec in specs {
        let tool = spec.tool;
        if let Err(e) = monitor.start_spec(spec).await {
            monitor.shutdown().await;
            return Err(e).with_context(|| format!("Cannot start {tool}"));
        }
    }

    // Launch TUI in a separate thread if not headless
    let (mut tui_handle, sink) = if args.headless {
        (None, Sink::Headless { sessions: Arc::clone(monitor.sessions()), session })
    } else {
        let (envelope_tx, envelope_rx) = bounded(1000);
        let control = Arc::clone(&knowledge);
        let handle = tokio::task::spawn_blocking(move || {
            tui::run_live(envelope_rx, tier, move |tier| control.set_tier(tier))
        });
        (Some(handle), Sink::Tui(envelope_tx))
    };

    let forwarder = tokio::spawn(forward_streams(crisis, Arc::clone(&knowledge), exporter, sink));

    // Report the first runner that gives up
    let (failure_tx, mut failure_rx) = mpsc::channel::<RunnerError>(tools.len().max(1));
    for tool in &tools {
        if let Some(runner) = monitor.runner(*tool).await {
            let failure_tx = failure_tx.clone();
            tokio::spawn(async move {
                if let Err(e) = runner.wait().await {
                    let _ = failure_tx.send(e).await;
                }
            });
        }
    }
    drop(failure_tx);

    let started = Instant::now();
    let duration_limit = (args.duration > 0).then(|| Duration::from_secs(args.duration));
    let tui_done = async {
        match tui_handle.as_mut() {
            Some(handle) => handle.await,
            None => std::future::pending().await,
        }
    };

    let mut failure = None;
    let mut tui_result = None;
    let exit_reason = tokio::select! {
        _ = tokio::signal::ctrl_c() => "interrupted",
        () = async {
            match duration_limit {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        } => "duration limit reached",
        result = tui_done => {
            tui_result = Some(result);
            "quit"
        }
        Some(e) = failure_rx.recv() => {
            failure = Some(e);
            "tool failed"
        }
    };

    let mut events = 0;
    for tool in &tools {
        if let Some(stats) = monitor.stats(*tool).await {
            events += stats.events;
        }
    }
    monitor.shutdown().await;
    let forward_stats = match forwarder.await {
        Ok(result) => result?,
        Err(e) => {
            warn!("Stream forwarder failed: {e}");
            ForwardStats::default()
        }
    };

    // TUI exits once the forwarder drops its channel
    if tui_result.is_none() {
        if let Some(handle) = tui_handle {
            tui_result = Some(handle.await);
        }
    }
    if let Some(result) = tui_result {
        result.context("TUI thread panicked")??;
    }

    if let (Some(store), Some(profile)) = (store, monitor.sessions().close(session)) {
        store.save(&profile).with_context(|| format!("Failed to save profile '{}'", profile.id))?;
    }

    if !quiet || args.headless {
        let drops = monitor.dispatcher().drop_stats(StreamKind::Crisis);
        eprintln!(
            "\n{exit_reason}: {:.1}s, {events} events (crisis: {}, knowledge: {}, exported: {}, crisis dropped: {} / {} urgent)",
            started.elapsed().as_secs_f64(),
            forward_stats.crisis,
            forward_stats.knowledge,
            forward_stats.exported,
            drops.dropped,
            drops.urgent_dropped,
        );
        if forward_stats.tui_dropped > 0 {
            eprintln!("TUI skipped {} envelopes", forward_stats.tui_dropped);
        }
    }

    match failure {
        Some(e) => Err(e).context("Monitoring stopped"),
        None => Ok(()),
    }
}

/// Drain both subscriptions until the dispatcher closes
async fn forward_streams(
    crisis: Subscription,
    knowledge: Arc<Subscription>,
    mut exporter: Option<EventExporter<BufWriter<File>>>,
    sink: Sink,
) -> Result<ForwardStats> {
    let mut stats = ForwardStats::default();
    let mut crisis_open = true;
    let mut knowledge_open = true;

    while crisis_open || knowledge_open {
        let batch = tokio::select! {
            batch = crisis.next_batch(BATCH_SIZE), if crisis_open => {
                crisis_open = !batch.is_empty();
                batch
            }
            batch = knowledge.next_batch(BATCH_SIZE), if knowledge_open => {
                knowledge_open = !batch.is_empty();
                batch
            }
        };

        for envelope in batch {
            match envelope.stream {
                StreamKind::Crisis => stats.crisis += 1,
                StreamKind::Knowledge => stats.knowledge += 1,
            }
            if let Some(ref mut exporter) = exporter {
                exporter.write(&envelope).context("Failed to export event")?;
            }
            match &sink {
                Sink::Headless { sessions, session } => print_envelope(&envelope, sessions, *session),
                Sink::Tui(tx) => {
                    if !send_to_tui(tx, envelope) {
                        stats.tui_dropped += 1;
                    }
                }
            }
        }
    }

    if let Some(exporter) = exporter {
        stats.exported = exporter.written();
        exporter.finish().context("Failed to flush export file")?;
    }
    Ok(stats)
}

/// Non-blocking send (drop if TUI is slow); false only when the channel is full
///
/// A closed TUI still lets the export finish.
fn send_to_tui(tx: &Sender<Envelope>, envelope: Envelope) -> bool {
    !matches!(tx.try_send(envelope), Err(TrySendError::Full(_)))
}

fn print_envelope(envelope: &Envelope, sessions: &SessionManager, session: SessionId) {
    match envelope.stream {
        StreamKind::Crisis => {
            println!("[crisis] {}", envelope.text);
            if !envelope.severity().is_alert() {
                return;
            }
            if let Some(analysis) = sessions.analyze(session, &envelope.event, None) {
                if !analysis.related.is_empty() {
                    println!("         {} related events in the last window", analysis.related.len());
                }
                if !analysis.learning_opportunities.is_empty() {
                    println!("         learn: {}", analysis.learning_opportunities.join(", "));
                }
            }
        }
        StreamKind::Knowledge => {
            let mut lines = envelope.text.lines();
            println!("[{}] {}", envelope.tier, lines.next().unwrap_or_default());
            for line in lines {
                println!("         {line}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domai::config::ParserConfig;
    use domai::domain::Seq;
    use domai::parser::LineParser;
    use domai_common::{EventSource, Tier};

    fn envelope(seq: u64) -> Envelope {
        let mut parser = LineParser::new(EventSource::Lsof, ParserConfig::default());
        let event = parser.parse("sshd 1234 root 3u IPv4 12345 0t0 TCP *:22 (LISTEN)").unwrap();
        Envelope {
            seq: Seq(seq),
            stream: StreamKind::Knowledge,
            tier: Tier::Raw,
            text: event.raw.clone(),
            event: Arc::new(event),
        }
    }

    #[test]
    fn test_slow_tui_never_blocks_forwarding() {
        let (tx, rx) = bounded(1);
        assert!(send_to_tui(&tx, envelope(1)));
        // Full: returns at once instead of waiting for the TUI
        assert!(!send_to_tui(&tx, envelope(2)));
        assert_eq!(rx.try_recv().unwrap().seq, Seq(1));

        drop(rx);
        assert!(send_to_tui(&tx, envelope(3)));
    }

    #[test]
    fn test_exit_codes() {
        let not_found = anyhow::Error::new(RunnerError::ToolNotFound {
            tool: EventSource::Tcpdump,
            searched: "/usr/sbin".into(),
        });
        assert_eq!(exit_code_for(&not_found.context("Cannot start tcpdump")), EXIT_NOT_FOUND);
        assert_eq!(exit_code_for(&anyhow::anyhow!("other")), EXIT_ERROR);
    }
}
