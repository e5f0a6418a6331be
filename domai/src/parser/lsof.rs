//! lsof grammar (`-i -n -P -r`)
//!
//! ```text
//! COMMAND   PID  USER   FD   TYPE DEVICE SIZE/OFF NODE NAME
//! sshd     1234  root    3u  IPv4  12345      0t0  TCP *:22 (LISTEN)
//! firefox  2345 alice   45u  IPv4  23456      0t0  TCP 10.0.0.5:52344->93.184.216.34:443 (ESTABLISHED)
//! avahi     678 avahi   12u  IPv6  34567      0t0  UDP [::1]:5353
//! =======
//! ```
//!
//! The SIZE/OFF column is sometimes blank, so the network columns are found
//! by looking for the NODE protocol (`TCP`/`UDP`) rather than by position.
//! Without `-i`, the `txt` entry naming a process's program image reports
//! the process itself.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use domai_common::{EventType, NetworkFields, ProcessInfo, Protocol};

use super::{split_host_port, Line, Observation};

pub(crate) fn parse_line(line: &str) -> Line {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with("COMMAND ") || trimmed.chars().all(|c| c == '=') {
        return Line::Noise;
    }

    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    if tokens.len() < 5 {
        return Line::Malformed("too few columns".into());
    }
    let Ok(pid) = tokens[1].parse::<u32>() else {
        return Line::Malformed(format!("bad pid '{}'", tokens[1]));
    };

    let mut obs = Observation {
        process: Some(ProcessInfo {
            command: tokens[0].to_string(),
            pid: Some(pid),
            user: Some(tokens[2].to_string()),
        }),
        ..Observation::default()
    };
    obs.metadata.insert("fd".into(), tokens[3].to_string());

    let kind = tokens[4];
    match kind {
        "IPv4" | "IPv6" => parse_socket(kind, &tokens[5..], obs),
        _ => {
            // REG, DIR, CHR ...: the name may contain spaces
            obs.event_type = Some(match tokens[3] {
                "txt" => EventType::ProcessLaunch,
                _ => EventType::FileAccess,
            });
            obs.metadata.insert("file_type".into(), kind.to_string());
            if tokens.len() > 8 {
                obs.metadata.insert("path".into(), tokens[8..].join(" "));
            }
            Line::Parsed(obs)
        }
    }
}

fn parse_socket(kind: &str, columns: &[&str], mut obs: Observation) -> Line {
    let Some(node_idx) = columns.iter().position(|c| matches!(*c, "TCP" | "UDP")) else {
        return Line::Malformed("missing socket protocol".into());
    };
    let protocol = if columns[node_idx] == "TCP" { Protocol::Tcp } else { Protocol::Udp };
    let Some(name) = columns.get(node_idx + 1) else {
        return Line::Malformed("missing socket name".into());
    };
    let state = columns
        .get(node_idx + 2)
        .and_then(|s| s.strip_prefix('(')?.strip_suffix(')'))
        .map(str::to_string);

    let wildcard = if kind == "IPv6" {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    } else {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    };
    let (local, remote) = match name.split_once("->") {
        Some((local, remote)) => (local, Some(remote)),
        None => (*name, None),
    };

    let Some((src_addr, src_port)) = parse_address(local, wildcard) else {
        return Line::Malformed(format!("bad local address '{local}'"));
    };
    let (dst_addr, dst_port) = match remote.map(|r| parse_address(r, wildcard)) {
        Some(Some((addr, port))) => (Some(addr), port),
        Some(None) => return Line::Malformed(format!("bad remote address '{name}'")),
        None => (None, None),
    };

    obs.event_type = Some(if state.as_deref() == Some("LISTEN") || (remote.is_none() && state.is_none()) {
        EventType::ListeningSocket
    } else {
        EventType::Connection
    });
    obs.network = NetworkFields {
        protocol: Some(protocol),
        src_addr: Some(src_addr),
        src_port,
        dst_addr,
        dst_port,
        flags: None,
        length: None,
        state,
    };
    Line::Parsed(obs)
}

/// `10.0.0.5:22`, `[::1]:5353`, `*:22`
fn parse_address(text: &str, wildcard: IpAddr) -> Option<(IpAddr, Option<u16>)> {
    let (host, port) = split_host_port(text, ':')?;
    let addr = if host == "*" { wildcard } else { host.parse().ok()? };
    Some((addr, port))
}
