//! netstat grammar (`-t -u -n -a -p -c`)
//!
//! ```text
//! Active Internet connections (servers and established)
//! Proto Recv-Q Send-Q Local Address           Foreign Address         State       PID/Program name
//! tcp        0      0 0.0.0.0:22              0.0.0.0:*               LISTEN      1234/sshd
//! tcp6       0      0 :::80                   :::*                    LISTEN      -
//! udp        0      0 0.0.0.0:68              0.0.0.0:*                           789/dhclient
//! ```
//!
//! BSD netstat separates the port with a dot (`10.0.0.5.22`); both forms are
//! accepted.

use std::net::IpAddr;

use domai_common::{EventType, NetworkFields, ProcessInfo, Protocol};

use super::{split_host_port, Line, Observation};

pub(crate) fn parse_line(line: &str) -> Line {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with("Active ") || trimmed.starts_with("Proto ") {
        return Line::Noise;
    }

    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    let protocol = match tokens[0] {
        "tcp" | "tcp4" | "tcp6" | "tcp46" => Protocol::Tcp,
        "udp" | "udp4" | "udp6" | "udp46" => Protocol::Udp,
        other => return Line::Malformed(format!("unsupported protocol '{other}'")),
    };
    if tokens.len() < 5 {
        return Line::Malformed("too few columns".into());
    }

    let (Some((src_addr, src_port)), Some((dst_addr, dst_port))) =
        (parse_address(tokens[3]), parse_address(tokens[4]))
    else {
        return Line::Malformed("unparseable address".into());
    };

    let mut obs = Observation::default();
    obs.metadata.insert("recv_q".into(), tokens[1].to_string());
    obs.metadata.insert("send_q".into(), tokens[2].to_string());

    // State is optional (UDP); the PID/Program column may contain spaces
    let mut rest = &tokens[5..];
    let mut state = None;
    if let Some(first) = rest.first().filter(|c| **c != "-" && !c.contains('/')) {
        state = Some((*first).to_string());
        rest = &rest[1..];
    }
    if let Some((pid, program)) = rest.first().and_then(|c| c.split_once('/')) {
        let command = std::iter::once(program).chain(rest[1..].iter().copied()).collect::<Vec<_>>();
        obs.process =
            Some(ProcessInfo { command: command.join(" "), pid: pid.parse().ok(), user: None });
    }

    // A wildcard foreign address means nothing is connected yet
    let unconnected = dst_port.is_none() && dst_addr.is_unspecified();
    obs.event_type = Some(if state.as_deref() == Some("LISTEN") || (state.is_none() && unconnected) {
        EventType::ListeningSocket
    } else {
        EventType::Connection
    });
    obs.network = NetworkFields {
        protocol: Some(protocol),
        src_addr: Some(src_addr),
        src_port,
        dst_addr: (!unconnected).then_some(dst_addr),
        dst_port,
        flags: None,
        length: None,
        state,
    };
    Line::Parsed(obs)
}

fn parse_address(text: &str) -> Option<(IpAddr, Option<u16>)> {
    for sep in [':', '.'] {
        if let Some((host, port)) = split_host_port(text, sep) {
            let host = if host == "*" { "0.0.0.0" } else { host };
            if let Ok(addr) = host.parse() {
                return Some((addr, port));
            }
        }
    }
    None
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
    fn test_tcp_listener() {
        let obs = parsed("tcp        0      0 0.0.0.0:22              0.0.0.0:*               LISTEN      1234/sshd");
        assert_eq!(obs.event_type, Some(EventType::ListeningSocket));
        assert_eq!(obs.network.src_port, Some(22));
        assert_eq!(obs.network.dst_addr, None);
        assert_eq!(obs.process.unwrap().command, "sshd");
    }

    #[test]
    fn test_ipv6_listener_without_pid() {
        let obs = parsed("tcp6       0      0 :::80                   :::*                    LISTEN      -");
        assert_eq!(obs.network.src_addr, Some("::".parse().unwrap()));
        assert_eq!(obs.network.src_port, Some(80));
        assert!(obs.process.is_none());
    }

    #[test]
    fn test_established() {
        let obs = parsed(
            "tcp        0     36 10.0.0.5:22             10.0.0.66:51812         ESTABLISHED 4321/sshd: alice",
        );
        assert_eq!(obs.event_type, Some(EventType::Connection));
        assert_eq!(obs.network.dst_addr, Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 66))));
        assert_eq!(obs.network.state.as_deref(), Some("ESTABLISHED"));
        assert_eq!(obs.metadata.get("send_q").map(String::as_str), Some("36"));
    }

    #[test]
    fn test_udp_without_state() {
        let obs = parsed("udp        0      0 0.0.0.0:68              0.0.0.0:*                           789/dhclient");
        assert_eq!(obs.network.protocol, Some(Protocol::Udp));
        assert_eq!(obs.event_type, Some(EventType::ListeningSocket));
        assert_eq!(obs.network.state, None);
    }

    #[test]
    fn test_bsd_dot_ports() {
        let obs = parsed("tcp4       0      0  10.0.0.5.22            10.0.0.66.51812        ESTABLISHED");
        assert_eq!(obs.network.src_port, Some(22));
        assert_eq!(obs.network.dst_port, Some(51812));
    }

    #[test]
    fn test_headers_and_garbage() {
        assert_eq!(parse_line("Active Internet connections (servers and established)"), Line::Noise);
        assert!(matches!(parse_line("netstat: no support for `AF INET (sctp)'"), Line::Malformed(_)));
    }
}
