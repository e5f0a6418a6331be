//! Line Parser: one raw tool output line in, at most one event out
//!
//! Each tool has its own grammar module. A grammar classifies a line as
//! noise (blank lines, column headers, repeat separators), a parsed
//! observation, or malformed text. The [`LineParser`] turns the latter two
//! into [`SecurityEvent`]s: nothing that looks like data is ever dropped.
//!
//! # Guarantees per parser instance
//!
//! - Event timestamps never decrease. A line stamped earlier than its
//!   predecessor is clamped to the previous timestamp and tagged
//!   `clock_adjusted=true`. Lines without a timestamp (and degraded lines)
//!   carry the last parsed timestamp, or their arrival time before the first
//!   one; they never move the clock forward.
//! - Malformed lines become `degraded` events with protocol `UNKNOWN`, the
//!   raw text verbatim, severity `info`, and a `parse_error` reason.

mod lsof;
mod netstat;
pub mod severity;
mod tcpdump;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use domai_common::{EventSource, EventType, NetworkFields, ProcessInfo, Protocol, SecurityEvent, Severity};
use log::debug;

use crate::config::ParserConfig;
use crate::domain::next_event_id;

/// Fields a grammar extracted from one line
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Observation {
    pub timestamp: Option<DateTime<Utc>>,
    pub event_type: Option<EventType>,
    pub network: NetworkFields,
    pub process: Option<ProcessInfo>,
    pub metadata: BTreeMap<String, String>,
}

/// What a grammar made of one line
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Line {
    /// Header, separator or blank: not an observation
    Noise,
    Parsed(Observation),
    Malformed(String),
}

/// Stateful parser for one tool's output stream
#[derive(Debug)]
pub struct LineParser {
    source: EventSource,
    config: ParserConfig,
    last_timestamp: Option<DateTime<Utc>>,
}

impl LineParser {
    #[must_use]
    pub fn new(source: EventSource, config: ParserConfig) -> Self {
        Self { source, config, last_timestamp: None }
    }

    #[must_use]
    pub fn source(&self) -> EventSource {
        self.source
    }

    /// Parse a line that arrived now
    pub fn parse(&mut self, line: &str) -> Option<SecurityEvent> {
        self.parse_received(line, Utc::now())
    }

    /// Parse a line, using `received_at` when the line carries no timestamp
    pub fn parse_received(&mut self, line: &str, received_at: DateTime<Utc>) -> Option<SecurityEvent> {
        let classified = match self.source {
            EventSource::Tcpdump => tcpdump::parse_line(line),
            EventSource::Lsof => lsof::parse_line(line),
            EventSource::Netstat => netstat::parse_line(line),
        };

        match classified {
            Line::Noise => None,
            Line::Parsed(observation) => Some(self.build(line, observation, received_at)),
            Line::Malformed(reason) => {
                debug!("{}: degraded line ({reason}): {line}", self.source);
                Some(self.degraded(line, reason, received_at))
            }
        }
    }

    fn build(&mut self, line: &str, obs: Observation, received_at: DateTime<Utc>) -> SecurityEvent {
        let mut metadata = obs.metadata;
        let timestamp = self.monotonic(obs.timestamp, received_at, &mut metadata);
        let severity = severity::classify(&obs.network, &self.config.watchlist);
        let event_type = obs.event_type.unwrap_or(EventType::Connection);

        SecurityEvent {
            id: next_event_id(),
            timestamp,
            source: self.source,
            event_type,
            severity,
            raw: line.to_string(),
            network: obs.network,
            process: obs.process,
            metadata,
            degraded: false,
        }
    }

    fn degraded(&mut self, line: &str, reason: String, received_at: DateTime<Utc>) -> SecurityEvent {
        let mut metadata = BTreeMap::new();
        metadata.insert("parse_error".to_string(), reason);
        let timestamp = self.monotonic(None, received_at, &mut metadata);

        SecurityEvent {
            id: next_event_id(),
            timestamp,
            source: self.source,
            event_type: EventType::Unknown,
            severity: Severity::Info,
            raw: line.to_string(),
            network: NetworkFields { protocol: Some(Protocol::Unknown), ..NetworkFields::default() },
            process: None,
            metadata,
            degraded: true,
        }
    }

    /// Parsed timestamps never decrease; untimed lines borrow the last one
    fn monotonic(
        &mut self,
        parsed: Option<DateTime<Utc>>,
        received_at: DateTime<Utc>,
        metadata: &mut BTreeMap<String, String>,
    ) -> DateTime<Utc> {
        let Some(candidate) = parsed else {
            return self.last_timestamp.unwrap_or(received_at);
        };
        let timestamp = match self.last_timestamp {
            Some(last) if candidate < last => {
                metadata.insert("clock_adjusted".to_string(), "true".to_string());
                last
            }
            _ => candidate,
        };
        self.last_timestamp = Some(timestamp);
        timestamp
    }
}

// ============================================================================
// Helpers shared by the grammars
// ============================================================================

/// Split `host<sep>port` at the last separator; `*` ports are `None`
pub(crate) fn split_host_port(text: &str, sep: char) -> Option<(&str, Option<u16>)> {
    let (host, port) = text.rsplit_once(sep)?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    match port {
        "*" => Some((host, None)),
        _ => port.parse().ok().map(|p| (host, Some(p))),
    }
}
