//! Tier Renderer
//!
//! [`render`] maps `(event, tier)` to display text. It is pure: no clock, no
//! randomness, no I/O, so the same pair always renders identically. It is
//! also total: every event renders at every tier, and fields the parser could
//! not extract fall back to generic wording instead of failing.
//!
//! | Tier         | Output                                              |
//! |--------------|-----------------------------------------------------|
//! | Raw          | the tool's line, verbatim                           |
//! | Novice       | one plain-language sentence                         |
//! | Intermediate | protocol, endpoints, flags, service, severity       |
//! | Expert       | multi-line breakdown ending with the raw line       |

use std::fmt::Write as _;
use std::net::IpAddr;

use domai_common::{EventType, Protocol, SecurityEvent, Severity, Tier};

use crate::ports::{self, PortClass};
use crate::profile::UserProfile;

/// Presentation options that don't change which facts are rendered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOptions {
    /// Replace IP addresses with `<redacted>` (raw tier is never altered)
    pub redact_addresses: bool,
}

impl RenderOptions {
    #[must_use]
    pub fn for_profile(profile: &UserProfile) -> Self {
        Self { redact_addresses: profile.preferences.privacy.redact_addresses }
    }
}

/// Explicit request wins over the profile's expertise
#[must_use]
pub fn select_tier(profile: &UserProfile, requested: Option<Tier>) -> Tier {
    requested.unwrap_or(profile.expertise)
}

/// Render `event` at `tier`
#[must_use]
pub fn render(event: &SecurityEvent, tier: Tier) -> String {
    render_with(event, tier, RenderOptions::default())
}

#[must_use]
pub fn render_with(event: &SecurityEvent, tier: Tier, opts: RenderOptions) -> String {
    let view = View { event, opts };
    match tier {
        Tier::Raw => event.raw.clone(),
        Tier::Novice => view.novice(),
        Tier::Intermediate => view.intermediate(),
        Tier::Expert => view.expert(),
    }
}

/// Action-oriented text for the crisis stream
///
/// Alerts (`high` and above) name the finding and a corrective action;
/// everything else is a short monitoring note.
#[must_use]
pub fn crisis_message(event: &SecurityEvent) -> String {
    crisis_message_with(event, RenderOptions::default())
}

#[must_use]
pub fn crisis_message_with(event: &SecurityEvent, opts: RenderOptions) -> String {
    let view = View { event, opts };
    let finding = view.finding();
    if event.severity.is_alert() {
        format!(
            "ALERT [{}]: {} detected! {}",
            event.severity.as_str().to_uppercase(),
            finding.headline,
            finding.action
        )
    } else {
        format!("Monitoring [{}]: {}", event.severity, finding.headline)
    }
}

// ============================================================================
// Rendering helpers
// ============================================================================

struct Finding {
    headline: String,
    action: &'static str,
}

struct View<'a> {
    event: &'a SecurityEvent,
    opts: RenderOptions,
}

impl View<'_> {
    fn addr(&self, addr: IpAddr) -> String {
        if self.opts.redact_addresses {
            "<redacted>".to_string()
        } else {
            addr.to_string()
        }
    }

    fn endpoint(&self, addr: Option<IpAddr>, port: Option<u16>) -> Option<String> {
        match (addr, port) {
            (Some(IpAddr::V6(v6)), Some(port)) if !self.opts.redact_addresses => {
                Some(format!("[{v6}]:{port}"))
            }
            (Some(addr), Some(port)) => Some(format!("{}:{port}", self.addr(addr))),
            (Some(addr), None) => Some(self.addr(addr)),
            (None, Some(port)) => Some(format!("port {port}")),
            (None, None) => None,
        }
    }

    fn process_label(&self) -> Option<String> {
        let process = self.event.process.as_ref()?;
        Some(match process.pid {
            Some(pid) => format!("{} (pid {pid})", process.command),
            None => process.command.clone(),
        })
    }

    fn service_phrase(&self) -> String {
        match ports::service_of(&self.event.network) {
            Some(info) if info.phrase.contains("connection") => info.phrase.to_string(),
            Some(info) => format!("{} connection", info.phrase),
            None if self.event.protocol() == Protocol::Udp => "network exchange".to_string(),
            None => "network connection".to_string(),
        }
    }

    fn novice(&self) -> String {
        let event = self.event;
        let net = &event.network;
        if event.degraded || event.event_type == EventType::Unknown {
            return format!(
                "{} reported something domai could not fully interpret, so the original output is kept as-is.",
                event.source
            );
        }

        let mut sentence = match event.event_type {
            EventType::ListeningSocket => {
                let who = self.process_label().unwrap_or_else(|| "A program".to_string());
                let port = net.src_port.map_or_else(String::new, |p| format!(" on port {p}"));
                let scope = if net.src_addr.is_some_and(|a| a.is_unspecified()) {
                    " from any network"
                } else if net.src_addr.is_some_and(|a| a.is_loopback()) {
                    " from this computer only"
                } else {
                    ""
                };
                let what = ports::service_of(net).map_or("network", |info| info.service);
                format!("{who} is waiting for incoming {what} connections{port}{scope}")
            }
            EventType::FileAccess => {
                let who = self.process_label().unwrap_or_else(|| "A program".to_string());
                match event.metadata.get("path") {
                    Some(path) => format!("{who} has the file {path} open"),
                    None => format!("{who} has a file open"),
                }
            }
            EventType::ProcessLaunch => {
                let who = self.process_label().unwrap_or_else(|| "a program".to_string());
                format!("A new program started: {who}")
            }
            EventType::Connection if event.protocol() == Protocol::Arp => {
                "A device on your local network asked which machine owns an address".to_string()
            }
            EventType::Connection | EventType::Unknown => {
                let phrase = self.service_phrase();
                let verb = match net.flags {
                    Some(f) if f.is_scan_signature() => "is being probed with unusual signals",
                    Some(f) if f.rst => "was refused or cut off",
                    Some(f) if f.is_connection_attempt() => "is being opened",
                    Some(f) if f.fin => "is being closed",
                    _ => "is active",
                };
                let between = match (net.src_addr, net.dst_addr) {
                    (Some(src), Some(dst)) => format!(" between {} and {}", self.addr(src), self.addr(dst)),
                    (Some(one), None) | (None, Some(one)) => format!(" involving {}", self.addr(one)),
                    (None, None) => String::new(),
                };
                format!("{} {phrase} {verb}{between}", capitalize(article(&phrase)))
            }
        };

        if event.severity.is_alert() {
            sentence.push_str(", and it looks risky enough to check right away");
        }
        sentence.push('.');
        sentence
    }

    fn intermediate(&self) -> String {
        let event = self.event;
        let net = &event.network;
        if event.degraded {
            let reason = event.metadata.get("parse_error").map_or("unrecognized format", String::as_str);
            return format!("{} output not parsed ({reason}) | severity {}", event.source, event.severity);
        }

        let mut parts = Vec::new();
        let src = self.endpoint(net.src_addr, net.src_port);
        let dst = self.endpoint(net.dst_addr, net.dst_port);
        let route = match (src, dst) {
            (Some(src), Some(dst)) => format!("{src} -> {dst}"),
            (Some(one), None) | (None, Some(one)) => one,
            (None, None) => "no endpoints".to_string(),
        };
        parts.push(format!("{} {route}", event.protocol()));

        if let Some(state) = &net.state {
            parts.push(state.clone());
        }
        if let Some(flags) = net.flags {
            parts.push(format!("flags {flags}"));
        }
        if let Some(info) = ports::service_of(net) {
            parts.push(info.service.to_string());
        }
        if let Some(process) = self.process_label() {
            parts.push(process);
        }
        parts.push(format!("severity {}", event.severity));
        parts.join(" | ")
    }

    fn expert(&self) -> String {
        let event = self.event;
        let net = &event.network;
        let mut out = String::new();

        let _ = writeln!(out, "event     {} from {} at {}", event.id, event.source, event.timestamp.to_rfc3339());
        let _ = writeln!(out, "type      {}, severity {}", event.event_type, event.severity);
        let _ = writeln!(out, "protocol  {}", event.protocol());
        for (label, addr, port) in [("source", net.src_addr, net.src_port), ("dest", net.dst_addr, net.dst_port)] {
            if let Some(endpoint) = self.endpoint(addr, port) {
                let service = port.and_then(ports::lookup).map_or(String::new(), |i| format!(" ({})", i.service));
                let _ = writeln!(out, "{label:<9} {endpoint}{service}");
            }
        }
        if let Some(flags) = net.flags {
            let _ = writeln!(out, "flags     {flags}{}", flag_note(flags));
        }
        if let Some(length) = net.length {
            let _ = writeln!(out, "length    {length}");
        }
        if let Some(state) = &net.state {
            let _ = writeln!(out, "state     {state}");
        }
        if let Some(process) = &event.process {
            let _ = write!(out, "process   {}", process.command);
            if let Some(pid) = process.pid {
                let _ = write!(out, " pid {pid}");
            }
            if let Some(user) = &process.user {
                let _ = write!(out, " user {user}");
            }
            out.push('\n');
        }
        if !event.metadata.is_empty() {
            let pairs: Vec<String> = event.metadata.iter().map(|(k, v)| format!("{k}={v}")).collect();
            let _ = writeln!(out, "metadata  {}", pairs.join(", "));
        }
        let _ = writeln!(out, "finding   {}", self.finding().headline);
        if self.opts.redact_addresses {
            out.push_str("raw       <redacted>");
        } else {
            let _ = write!(out, "raw       {}", event.raw);
        }
        out
    }

    /// The most significant thing about this event, mirroring the severity rules
    fn finding(&self) -> Finding {
        let event = self.event;
        let net = &event.network;
        let worst_port = net.ports().max_by_key(|p| ports::class_of(*p));
        let class = worst_port.map_or(PortClass::Ordinary, ports::class_of);

        if event.degraded {
            return Finding {
                headline: format!("unparsed {} output", event.source),
                action: "Review the raw output manually.",
            };
        }
        if event.severity == Severity::Critical && class != PortClass::Backdoor {
            return Finding {
                headline: format!("Traffic involving a watchlisted address ({})", self.route_summary()),
                action: "Investigate this host immediately and consider blocking it.",
            };
        }
        if let Some(port) = worst_port.filter(|_| class == PortClass::Backdoor) {
            return Finding {
                headline: format!("Traffic on known backdoor port {port} ({})", self.route_summary()),
                action: "Identify the process using this port and isolate the host if it is not expected.",
            };
        }
        if net.flags.is_some_and(|f| f.is_scan_signature()) {
            return Finding {
                headline: format!("Possible port scan ({})", self.route_summary()),
                action: "Block the source address if the probes continue.",
            };
        }
        if let Some(info) = worst_port.and_then(ports::lookup).filter(|_| class == PortClass::CleartextAdmin) {
            return Finding {
                headline: format!("Unencrypted {} session ({})", info.service, self.route_summary()),
                action: "Disable the service or replace it with an encrypted alternative such as SSH.",
            };
        }
        if let Some(info) = worst_port.and_then(ports::lookup).filter(|_| class == PortClass::Sensitive) {
            return Finding {
                headline: format!("{} activity ({})", info.service.to_uppercase(), self.route_summary()),
                action: "Confirm the service is meant to be reachable.",
            };
        }
        Finding {
            headline: format!("{} {} ({})", event.protocol(), event.event_type, self.route_summary()),
            action: "No action needed.",
        }
    }

    fn route_summary(&self) -> String {
        let net = &self.event.network;
        match (self.endpoint(net.src_addr, net.src_port), self.endpoint(net.dst_addr, net.dst_port)) {
            (Some(src), Some(dst)) => format!("{src} -> {dst}"),
            (Some(one), None) | (None, Some(one)) => one,
            (None, None) => self.event.source.to_string(),
        }
    }
}

fn flag_note(flags: domai_common::TcpFlags) -> &'static str {
    if flags.is_scan_signature() {
        "  (invalid combination, typical of stealth scans)"
    } else if flags.is_connection_attempt() {
        "  (connection attempt, first step of the TCP handshake)"
    } else if flags.syn && flags.ack {
        "  (handshake reply, the server accepted)"
    } else if flags.rst {
        "  (reset, connection refused or aborted)"
    } else if flags.fin {
        "  (orderly close)"
    } else {
        ""
    }
}

fn article(phrase: &str) -> &'static str {
    match phrase.chars().next() {
        Some(c) if "aeiouAEIOU".contains(c) => "an",
        _ => "a",
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParserConfig;
    use crate::parser::LineParser;
    use domai_common::EventSource;

    const SYN_LINE: &str = "2024-01-01 10:00:00.000000 TCP 10.0.0.5.443 > 10.0.0.9.51000: Flags [S]";

    fn event(source: EventSource, line: &str) -> SecurityEvent {
        LineParser::new(source, ParserConfig::default()).parse(line).unwrap()
    }

    #[test]
    fn test_raw_is_verbatim() {
        let e = event(EventSource::Tcpdump, SYN_LINE);
        assert_eq!(render(&e, Tier::Raw), SYN_LINE);
    }

    #[test]
    fn test_novice_names_service_from_source_port() {
        let e = event(EventSource::Tcpdump, SYN_LINE);
        let text = render(&e, Tier::Novice);
        assert!(text.contains("secure web connection"), "{text}");
        assert!(text.starts_with("A secure web connection is being opened"));
        assert!(text.ends_with('.'));
    }

    #[test]
    fn test_intermediate_lists_flags_and_endpoints() {
        let e = event(EventSource::Tcpdump, SYN_LINE);
        let text = render(&e, Tier::Intermediate);
        assert_eq!(text, "TCP 10.0.0.5:443 -> 10.0.0.9:51000 | flags SYN | https | severity low");
    }

    #[test]
    fn test_expert_includes_raw_line() {
        let e = event(EventSource::Tcpdump, SYN_LINE);
        let text = render(&e, Tier::Expert);
        assert!(text.lines().count() > 4);
        assert!(text.ends_with(SYN_LINE));
        assert!(text.contains("connection attempt"));
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let e = event(EventSource::Lsof, "sshd 1234 root 3u IPv4 12345 0t0 TCP *:22 (LISTEN)");
        for tier in Tier::ALL {
            assert_eq!(render(&e, tier), render(&e, tier));
        }
    }

    #[test]
    fn test_degraded_event_renders_every_tier() {
        let e = event(EventSource::Netstat, "something odd happened");
        assert!(e.degraded);
        for tier in Tier::ALL {
            assert!(!render(&e, tier).is_empty());
        }
        assert_eq!(render(&e, Tier::Raw), "something odd happened");
    }

    #[test]
    fn test_listener_novice_sentence() {
        let e = event(EventSource::Lsof, "sshd 1234 root 3u IPv4 12345 0t0 TCP *:22 (LISTEN)");
        assert_eq!(
            render(&e, Tier::Novice),
            "sshd (pid 1234) is waiting for incoming ssh connections on port 22 from any network."
        );
    }

    #[test]
    fn test_redaction_spares_raw_tier() {
        let e = event(EventSource::Tcpdump, SYN_LINE);
        let opts = RenderOptions { redact_addresses: true };
        assert!(!render_with(&e, Tier::Novice, opts).contains("10.0.0.5"));
        assert!(!render_with(&e, Tier::Intermediate, opts).contains("10.0.0.9"));
        assert!(!render_with(&e, Tier::Expert, opts).contains("10.0.0."));
        assert_eq!(render_with(&e, Tier::Raw, opts), SYN_LINE);
        assert!(!crisis_message_with(&e, opts).contains("10.0.0."));
        assert!(crisis_message(&e).contains("10.0.0.5"));
    }

    #[test]
    fn test_crisis_message_for_backdoor() {
        let e = event(
            EventSource::Tcpdump,
            "2024-01-01 10:00:00.000000 IP 10.0.0.5.51000 > 10.0.0.66.4444: Flags [P.], length 12",
        );
        let text = crisis_message(&e);
        assert!(text.starts_with("ALERT [CRITICAL]"), "{text}");
        assert!(text.contains("backdoor port 4444"));
    }

    #[test]
    fn test_crisis_message_for_routine_traffic() {
        let e = event(EventSource::Tcpdump, SYN_LINE);
        assert!(crisis_message(&e).starts_with("Monitoring [low]"));
    }

    #[test]
    fn test_explicit_tier_wins() {
        let profile = UserProfile::new("u", Tier::Expert);
        assert_eq!(select_tier(&profile, Some(Tier::Raw)), Tier::Raw);
        assert_eq!(select_tier(&profile, None), Tier::Expert);
    }
}
