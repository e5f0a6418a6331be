//! # Shared Data Model (core ↔ stream consumers)
//!
//! Defines the records that flow out of the domai core: the parsed
//! [`SecurityEvent`], its ordered [`Severity`], the explanation [`Tier`]s and
//! the serialized [`OutboundRecord`] handed to whatever transport sits on top
//! of the dual-stream dispatcher (socket layer, UI, export file).
//!
//! Everything here is plain data. Parsing, rendering and dispatch live in the
//! `domai` crate.
//!
//! ## Key Types
//!
//! - [`SecurityEvent`] - One structured observation produced from one tool line
//! - [`Severity`] - Ordered `info < low < medium < high < critical`
//! - [`Tier`] - Ordered explanation depth `raw < novice < intermediate < expert`
//! - [`StreamKind`] - Crisis (action) vs knowledge (explanation) stream
//! - [`OutboundRecord`] - Serialized form of an event plus one rendered explanation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique event identifier
///
/// Allocated by the line parser from a process-wide sequence, so ids are
/// unique across every tool monitored by one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EVT:{}", self.0)
    }
}

/// Error returned when a string does not name a known variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

fn unknown(kind: &'static str, value: &str) -> UnknownVariant {
    UnknownVariant { kind, value: value.to_string() }
}

// ============================================================================
// Severity
// ============================================================================

/// Event severity, ordered from least to most urgent
///
/// The derive order is the contract: `Info < Low < Medium < High < Critical`.
/// Dispatch drop policies and notification thresholds compare with `<`/`>=`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 5] =
        [Severity::Info, Severity::Low, Severity::Medium, Severity::High, Severity::Critical];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// True for the severities the crisis stream treats as alerts
    #[must_use]
    pub fn is_alert(self) -> bool {
        self >= Severity::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(unknown("severity", s)),
        }
    }
}

// ============================================================================
// Event classification
// ============================================================================

/// Diagnostic tool that produced the raw line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    /// Packet capture (`tcpdump -tttt -n -l`)
    Tcpdump,
    /// Open network files per process (`lsof -i -n -P`)
    Lsof,
    /// Socket table snapshot (`netstat -tunap`)
    Netstat,
}

impl EventSource {
    pub const ALL: [EventSource; 3] = [EventSource::Tcpdump, EventSource::Lsof, EventSource::Netstat];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventSource::Tcpdump => "tcpdump",
            EventSource::Lsof => "lsof",
            EventSource::Netstat => "netstat",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventSource {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcpdump" => Ok(EventSource::Tcpdump),
            "lsof" => Ok(EventSource::Lsof),
            "netstat" => Ok(EventSource::Netstat),
            _ => Err(unknown("tool", s)),
        }
    }
}

/// What kind of activity an event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Traffic or an established/in-progress connection between two endpoints
    Connection,
    /// A socket accepting inbound connections
    ListeningSocket,
    /// A process holding a regular file or directory open
    FileAccess,
    /// A process observed for the first time
    ProcessLaunch,
    /// The line could not be interpreted
    Unknown,
}

impl EventType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Connection => "connection",
            EventType::ListeningSocket => "listening_socket",
            EventType::FileAccess => "file_access",
            EventType::ProcessLaunch => "process_launch",
            EventType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport or link protocol of a network observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Arp,
    /// IP traffic whose transport could not be determined from the line
    Ip,
    /// Parse-degraded marker
    Unknown,
}

impl Protocol {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Icmp => "ICMP",
            Protocol::Arp => "ARP",
            Protocol::Ip => "IP",
            Protocol::Unknown => "UNKNOWN",
        }
    }

    #[must_use]
    pub fn is_known(self) -> bool {
        self != Protocol::Unknown
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TCP control flags as printed by tcpdump (`Flags [S.]`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)] // one bool per wire flag
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
    pub psh: bool,
    pub urg: bool,
    pub ece: bool,
    pub cwr: bool,
}

impl TcpFlags {
    /// No flag set at all (tcpdump prints `[none]`), a classic null scan
    #[must_use]
    pub fn is_null(&self) -> bool {
        *self == TcpFlags::default()
    }

    /// Connection attempt: SYN without ACK
    #[must_use]
    pub fn is_connection_attempt(&self) -> bool {
        self.syn && !self.ack
    }

    /// Flag combinations that never occur in a legitimate handshake
    #[must_use]
    pub fn is_scan_signature(&self) -> bool {
        self.is_null() || (self.syn && self.fin) || (self.fin && self.psh && self.urg)
    }

    /// Names of the set flags in wire order
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        [
            (self.syn, "SYN"),
            (self.ack, "ACK"),
            (self.fin, "FIN"),
            (self.rst, "RST"),
            (self.psh, "PSH"),
            (self.urg, "URG"),
            (self.ece, "ECE"),
            (self.cwr, "CWR"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect()
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("none")
        } else {
            f.write_str(&self.names().join(","))
        }
    }
}

/// Network fields extracted from a line; every field is optional
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkFields {
    pub protocol: Option<Protocol>,
    pub src_addr: Option<IpAddr>,
    pub src_port: Option<u16>,
    pub dst_addr: Option<IpAddr>,
    pub dst_port: Option<u16>,
    pub flags: Option<TcpFlags>,
    pub length: Option<u32>,
    /// Socket state (`LISTEN`, `ESTABLISHED`, ...)
    pub state: Option<String>,
}

impl NetworkFields {
    /// Ports present on either side, destination first
    pub fn ports(&self) -> impl Iterator<Item = u16> {
        self.dst_port.into_iter().chain(self.src_port)
    }

    /// Addresses present on either side, source first
    pub fn addresses(&self) -> impl Iterator<Item = IpAddr> {
        self.src_addr.into_iter().chain(self.dst_addr)
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.state.as_deref() == Some("LISTEN")
    }
}

/// Owning process, when the tool reports one (lsof, netstat -p)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub command: String,
    pub pid: Option<u32>,
    pub user: Option<String>,
}

// ============================================================================
// Security event
// ============================================================================

/// One structured observation produced from one raw tool output line
///
/// Immutable once built. The parser owns creation; the context window and the
/// dispatcher hold it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
    pub event_type: EventType,
    pub severity: Severity,
    /// The original line, byte for byte
    pub raw: String,
    pub network: NetworkFields,
    pub process: Option<ProcessInfo>,
    pub metadata: BTreeMap<String, String>,
    /// Set when the line did not match the tool grammar
    pub degraded: bool,
}

impl SecurityEvent {
    /// Protocol, falling back to `Unknown` when none was extracted
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.network.protocol.unwrap_or(Protocol::Unknown)
    }
}

// ============================================================================
// Explanation tiers and streams
// ============================================================================

/// Explanation depth, ordered from verbatim output to full breakdown
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Raw tool output, untouched
    Raw,
    /// One plain-language sentence
    #[default]
    Novice,
    /// Protocol, endpoints and notable flags
    #[serde(alias = "apprentice")]
    Intermediate,
    /// Full technical breakdown including the raw text
    #[serde(alias = "guardian", alias = "sentinel")]
    Expert,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Raw, Tier::Novice, Tier::Intermediate, Tier::Expert];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Raw => "raw",
            Tier::Novice => "novice",
            Tier::Intermediate => "intermediate",
            Tier::Expert => "expert",
        }
    }

    /// Next tier, wrapping from expert back to raw
    #[must_use]
    pub fn next(self) -> Tier {
        match self {
            Tier::Raw => Tier::Novice,
            Tier::Novice => Tier::Intermediate,
            Tier::Intermediate => Tier::Expert,
            Tier::Expert => Tier::Raw,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = UnknownVariant;

    /// Accepts the user-level names used by the assistant persona as aliases
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(Tier::Raw),
            "novice" => Ok(Tier::Novice),
            "intermediate" | "apprentice" => Ok(Tier::Intermediate),
            "expert" | "guardian" | "sentinel" => Ok(Tier::Expert),
            _ => Err(unknown("tier", s)),
        }
    }
}

/// The two logically independent output streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Action-oriented findings, biased toward high severity
    Crisis,
    /// Tier-adapted explanations of the same findings
    Knowledge,
}

impl StreamKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Crisis => "crisis",
            StreamKind::Knowledge => "knowledge",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Outbound representation
// ============================================================================

/// Record handed to the transport layer for one event on one stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundRecord {
    pub seq: u64,
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub severity: Severity,
    pub raw: String,
    pub network: NetworkFields,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub process: Option<ProcessInfo>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub metadata: BTreeMap<String, String>,
    pub degraded: bool,
    pub stream: StreamKind,
    pub tier: Tier,
    pub explanation: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Low);
        assert!(Severity::High < Severity::Critical);
        assert!(Severity::High.is_alert());
        assert!(!Severity::Medium.is_alert());
    }

    #[test]
    fn test_tier_aliases() {
        assert_eq!("apprentice".parse::<Tier>().unwrap(), Tier::Intermediate);
        assert_eq!("Guardian".parse::<Tier>().unwrap(), Tier::Expert);
        assert!("wizard".parse::<Tier>().is_err());
    }

    #[test]
    fn test_tier_cycle_wraps() {
        let mut tier = Tier::Raw;
        for _ in 0..Tier::ALL.len() {
            tier = tier.next();
        }
        assert_eq!(tier, Tier::Raw);
    }

    #[test]
    fn test_flag_signatures() {
        let syn = TcpFlags { syn: true, ..TcpFlags::default() };
        assert!(syn.is_connection_attempt());
        assert!(!syn.is_scan_signature());
        assert!(TcpFlags::default().is_scan_signature());
        assert_eq!(syn.to_string(), "SYN");
        assert_eq!(TcpFlags::default().to_string(), "none");
    }

    #[test]
    fn test_severity_serializes_lowercase() {
        let json = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
    }
}
