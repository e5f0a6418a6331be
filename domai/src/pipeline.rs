//! Per-tool processing stage
//!
//! Consumes the runner's raw lines in order, parses them, records each event
//! into the open sessions and publishes it. One pipeline task per tool keeps
//! the chain single-producer/single-consumer, so events leave in the order
//! their lines arrived.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use domai_common::SecurityEvent;
use log::debug;
use tokio::sync::mpsc;

use crate::dispatch::Dispatcher;
use crate::parser::LineParser;
use crate::runner::RawLine;
use crate::session::SessionManager;

/// Snapshot of a pipeline's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Raw lines received from the runner
    pub lines: u64,
    /// Events published (parsed + degraded)
    pub events: u64,
    /// Events published with the degraded flag
    pub degraded: u64,
    /// Headers, separators and blank lines
    pub discarded: u64,
}

/// Live counters, readable while the pipeline runs
#[derive(Debug, Default)]
pub struct PipelineCounters {
    lines: AtomicU64,
    events: AtomicU64,
    degraded: AtomicU64,
    discarded: AtomicU64,
}

impl PipelineCounters {
    #[must_use]
    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            lines: self.lines.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

pub struct Pipeline {
    parser: LineParser,
    sessions: Arc<SessionManager>,
    dispatcher: Dispatcher,
    counters: Arc<PipelineCounters>,
}

impl Pipeline {
    #[must_use]
    pub fn new(parser: LineParser, sessions: Arc<SessionManager>, dispatcher: Dispatcher) -> Self {
        Self { parser, sessions, dispatcher, counters: Arc::new(PipelineCounters::default()) }
    }

    /// Shared handle on the live counters
    #[must_use]
    pub fn counters(&self) -> Arc<PipelineCounters> {
        Arc::clone(&self.counters)
    }

    /// Handle one line; returns the published event, if any
    pub fn process(&mut self, raw: &RawLine) -> Option<Arc<SecurityEvent>> {
        self.counters.lines.fetch_add(1, Ordering::Relaxed);

        let Some(event) = self.parser.parse_received(&raw.line, raw.received_at) else {
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        if event.degraded {
            self.counters.degraded.fetch_add(1, Ordering::Relaxed);
        }

        let event = Arc::new(event);
        self.sessions.record(&event);
        let seq = self.dispatcher.publish(Arc::clone(&event));
        self.counters.events.fetch_add(1, Ordering::Relaxed);
        debug!("{} {seq} {} {}", event.source, event.id, event.severity);
        Some(event)
    }

    /// Run until the runner closes its end of the channel
    pub async fn run(mut self, mut lines: mpsc::Receiver<RawLine>) -> PipelineStats {
        while let Some(raw) = lines.recv().await {
            self.process(&raw);
        }
        let stats = self.counters.snapshot();
        debug!(
            "{} pipeline finished: {} lines, {} events ({} degraded), {} discarded",
            self.parser.source(),
            stats.lines,
            stats.events,
            stats.degraded,
            stats.discarded
        );
        stats
    }
}
