//! tcpdump grammar (`-tttt -n -l`)
//!
//! ```text
//! 2024-01-01 10:00:00.000000 IP 10.0.0.5.443 > 10.0.0.9.51000: Flags [S.], seq 1, length 0
//! 2024-01-01 10:00:00.000000 eth0  Out IP 10.0.0.5.53 > 10.0.0.9.40000: 1234 1/0/0 A 1.2.3.4 (48)
//! 2024-01-01 10:00:00.000000 IP6 fe80::1.546 > ff02::1:2.547: dhcp6 solicit
//! 2024-01-01 10:00:00.000000 ARP, Request who-has 10.0.0.1 tell 10.0.0.2, length 28
//! ```
//!
//! Endpoints are `address.port` with the port after the last dot. With
//! `-i any` recent tcpdump versions insert the interface name and direction
//! between the timestamp and the protocol.

use std::net::IpAddr;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use domai_common::{EventType, NetworkFields, Protocol, TcpFlags};

use super::{Line, Observation};

const DIRECTIONS: &[&str] = &["In", "Out", "B", "M", "P"];

pub(crate) fn parse_line(line: &str) -> Line {
    let trimmed = line.trim();
    if trimmed.is_empty() || is_banner(trimmed) {
        return Line::Noise;
    }

    let mut tokens = trimmed.splitn(3, ' ');
    let (Some(date), Some(time), Some(rest)) = (tokens.next(), tokens.next(), tokens.next()) else {
        return Line::Malformed("missing timestamp".into());
    };
    let Some(timestamp) = parse_timestamp(date, time) else {
        return Line::Malformed("missing timestamp".into());
    };

    let mut obs = Observation { timestamp: Some(timestamp), ..Observation::default() };
    let rest = strip_interface(rest.trim_start(), &mut obs);

    let Some((proto, body)) = rest.split_once(' ') else {
        return Line::Malformed("missing protocol".into());
    };
    match proto.trim_end_matches(',') {
        "ARP" => parse_arp(body, obs),
        "IP" | "IP6" | "TCP" | "UDP" | "ICMP" => parse_ip(proto, body, obs),
        other => Line::Malformed(format!("unsupported protocol '{other}'")),
    }
}

fn is_banner(line: &str) -> bool {
    line.starts_with("tcpdump:")
        || line.starts_with("listening on")
        || line.ends_with("packets captured")
        || line.ends_with("packets received by filter")
        || line.ends_with("packets dropped by kernel")
}

/// tcpdump prints local wall-clock time
fn parse_timestamp(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S%.f").ok()?;
    Local.from_local_datetime(&naive).earliest().map(|local| local.with_timezone(&Utc))
}

/// Consume an optional `<ifname> <direction>` prefix
fn strip_interface<'a>(rest: &'a str, obs: &mut Observation) -> &'a str {
    let mut parts = rest.splitn(3, char::is_whitespace);
    if let (Some(iface), Some(dir)) = (parts.next(), parts.next()) {
        let after = parts.next().unwrap_or("").trim_start();
        // Tolerate the column padding tcpdump uses after the interface name
        let (dir, after) = if dir.is_empty() {
            after.split_once(char::is_whitespace).map_or((after, ""), |(d, a)| (d, a.trim_start()))
        } else {
            (dir, after)
        };
        if DIRECTIONS.contains(&dir) {
            obs.metadata.insert("interface".into(), iface.to_string());
            obs.metadata.insert("direction".into(), dir.to_lowercase());
            return after;
        }
    }
    rest
}

fn parse_ip(proto: &str, body: &str, mut obs: Observation) -> Line {
    let Some((src, after_src)) = body.split_once(" > ") else {
        return Line::Malformed("missing '>' between endpoints".into());
    };
    // IPv6 addresses contain colons but never ": ", which ends the endpoint
    let Some((dst, payload)) =
        after_src.split_once(": ").or_else(|| after_src.strip_suffix(':').map(|d| (d, "")))
    else {
        return Line::Malformed("missing destination".into());
    };
    let payload = payload.trim();

    let (Some((src_addr, src_port)), Some((dst_addr, dst_port))) =
        (parse_endpoint(src.trim()), parse_endpoint(dst.trim()))
    else {
        return Line::Malformed("unparseable endpoint".into());
    };

    let flags = parse_flags(payload);
    let protocol = match proto {
        "TCP" => Protocol::Tcp,
        "UDP" => Protocol::Udp,
        "ICMP" => Protocol::Icmp,
        _ if flags.is_some() => Protocol::Tcp,
        _ if payload.starts_with("UDP") || payload.contains(" UDP,") => Protocol::Udp,
        _ if payload.starts_with("ICMP") => Protocol::Icmp,
        _ => Protocol::Ip,
    };
    if proto == "IP6" {
        obs.metadata.insert("ip_version".into(), "6".into());
    }

    obs.event_type = Some(EventType::Connection);
    obs.network = NetworkFields {
        protocol: Some(protocol),
        src_addr: Some(src_addr),
        src_port,
        dst_addr: Some(dst_addr),
        dst_port,
        flags,
        length: parse_length(payload),
        state: None,
    };
    Line::Parsed(obs)
}

fn parse_arp(body: &str, mut obs: Observation) -> Line {
    let words: Vec<&str> = body.split_whitespace().map(|w| w.trim_end_matches(',')).collect();
    let after = |key: &str| {
        words.iter().position(|w| *w == key).and_then(|i| words.get(i + 1)).and_then(|w| w.parse::<IpAddr>().ok())
    };

    let (src_addr, dst_addr) = if words.first() == Some(&"Request") {
        (after("tell"), after("who-has"))
    } else if words.first() == Some(&"Reply") {
        (words.get(1).and_then(|w| w.parse().ok()), None)
    } else {
        (None, None)
    };
    if let Some(kind) = words.first() {
        obs.metadata.insert("arp".into(), kind.to_lowercase());
    }

    obs.event_type = Some(EventType::Connection);
    obs.network = NetworkFields {
        protocol: Some(Protocol::Arp),
        src_addr,
        dst_addr,
        length: parse_length(body),
        ..NetworkFields::default()
    };
    Line::Parsed(obs)
}

/// `10.0.0.5.443`, `fe80::1.546`, or a bare address (ICMP)
fn parse_endpoint(text: &str) -> Option<(IpAddr, Option<u16>)> {
    if let Ok(addr) = text.parse::<IpAddr>() {
        return Some((addr, None));
    }
    let (host, port) = text.rsplit_once('.')?;
    Some((host.parse().ok()?, Some(port.parse().ok()?)))
}

/// `Flags [S.]`; `[none]` is a packet with no flag set
fn parse_flags(payload: &str) -> Option<TcpFlags> {
    let start = payload.find("Flags [")? + "Flags [".len();
    let len = payload[start..].find(']')?;
    let letters = &payload[start..start + len];

    let mut flags = TcpFlags::default();
    if letters == "none" {
        return Some(flags);
    }
    for c in letters.chars() {
        match c {
            'S' => flags.syn = true,
            'F' => flags.fin = true,
            'R' => flags.rst = true,
            'P' => flags.psh = true,
            'U' => flags.urg = true,
            'E' => flags.ece = true,
            'W' => flags.cwr = true,
            '.' => flags.ack = true,
            _ => {}
        }
    }
    Some(flags)
}

/// Last `length N` in the payload
fn parse_length(payload: &str) -> Option<u32> {
    let words: Vec<&str> = payload.split_whitespace().collect();
    words
        .windows(2)
        .rev()
        .find(|pair| pair[0] == "length")
        .and_then(|pair| pair[1].trim_end_matches([',', ':', ')']).parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn parsed(line: &str) -> Observation {
        match parse_line(line) {
            Line::Parsed(obs) => obs,
            other => panic!("expected a parsed line, got {other:?}"),
        }
    }

    #[test]
    fn test_explicit_tcp_syn() {
        let obs = parsed("2024-01-01 10:00:00.000000 TCP 10.0.0.5.443 > 10.0.0.9.51000: Flags [S]");
        assert_eq!(obs.network.protocol, Some(Protocol::Tcp));
        assert_eq!(obs.network.src_addr, Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))));
        assert_eq!(obs.network.src_port, Some(443));
        assert_eq!(obs.network.dst_port, Some(51000));
        let flags = obs.network.flags.unwrap();
        assert!(flags.syn);
        assert!(!flags.ack);
        assert_eq!(obs.network.length, None);
    }

    #[test]
    fn test_ip_with_flags_infers_tcp() {
        let obs = parsed(
            "2024-01-01 10:00:00.123456 IP 192.168.1.10.52344 > 93.184.216.34.443: \
             Flags [S.], seq 1, ack 2, win 64240, length 0",
        );
        assert_eq!(obs.network.protocol, Some(Protocol::Tcp));
        let flags = obs.network.flags.unwrap();
        assert!(flags.syn && flags.ack);
        assert_eq!(obs.network.length, Some(0));
    }

    #[test]
    fn test_udp_and_icmp() {
        let udp = parsed("2024-01-01 10:00:00.000000 IP 10.0.0.1.5353 > 224.0.0.251.5353: UDP, length 32");
        assert_eq!(udp.network.protocol, Some(Protocol::Udp));
        assert_eq!(udp.network.length, Some(32));

        let icmp = parsed(
            "2024-01-01 10:00:00.000000 IP 10.0.0.1 > 10.0.0.2: ICMP echo request, id 1, seq 1, length 64",
        );
        assert_eq!(icmp.network.protocol, Some(Protocol::Icmp));
        assert_eq!(icmp.network.src_port, None);
        assert_eq!(icmp.network.flags, None);
    }

    #[test]
    fn test_ipv6_endpoints() {
        let obs = parsed("2024-01-01 10:00:00.000000 IP6 fe80::1.546 > ff02::1:2.547: dhcp6 solicit");
        assert_eq!(obs.network.src_addr, Some("fe80::1".parse().unwrap()));
        assert_eq!(obs.network.dst_addr, Some("ff02::1:2".parse().unwrap()));
        assert_eq!(obs.network.dst_port, Some(547));
        assert_eq!(obs.metadata.get("ip_version").map(String::as_str), Some("6"));
    }

    #[test]
    fn test_any_interface_prefix() {
        let obs = parsed(
            "2024-01-01 10:00:00.000000 eth0  Out IP 10.0.0.5.22 > 10.0.0.9.40000: Flags [P.], length 36",
        );
        assert_eq!(obs.metadata.get("interface").map(String::as_str), Some("eth0"));
        assert_eq!(obs.metadata.get("direction").map(String::as_str), Some("out"));
        assert_eq!(obs.network.src_port, Some(22));
    }

    #[test]
    fn test_arp_request() {
        let obs = parsed("2024-01-01 10:00:00.000000 ARP, Request who-has 10.0.0.1 tell 10.0.0.2, length 28");
        assert_eq!(obs.network.protocol, Some(Protocol::Arp));
        assert_eq!(obs.network.dst_addr, Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
        assert_eq!(obs.network.src_addr, Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))));
        assert_eq!(obs.network.length, Some(28));
    }

    #[test]
    fn test_null_flags() {
        let obs = parsed("2024-01-01 10:00:00.000000 IP 10.0.0.66.40000 > 10.0.0.9.80: Flags [none], length 0");
        assert!(obs.network.flags.unwrap().is_null());
    }

    #[test]
    fn test_banner_and_garbage() {
        assert_eq!(parse_line("listening on any, link-type LINUX_SLL2, snapshot length 262144 bytes"), Line::Noise);
        assert_eq!(parse_line("12 packets captured"), Line::Noise);
        assert!(matches!(parse_line("hello world"), Line::Malformed(_)));
        assert!(matches!(
            parse_line("2024-01-01 10:00:00.000000 IP nonsense > also-nonsense: x"),
            Line::Malformed(_)
        ));
    }
}
