//! Deterministic severity assignment
//!
//! Severity is a pure function of the parsed fields and the watchlist. Each
//! rule proposes a floor and the result is the highest floor proposed:
//!
//! | Rule                                              | Severity   |
//! |---------------------------------------------------|------------|
//! | either address is on the watchlist                | `critical` |
//! | either port is a backdoor port                    | `critical` |
//! | either port is cleartext remote admin             | `high`     |
//! | TCP flag scan signature (null, SYN+FIN, FIN+PSH+URG) | `high`  |
//! | either port is remote access, database, file share | `medium`  |
//! | SYN without ACK (connection attempt)              | `low`      |
//! | RST                                               | `low`      |
//! | socket listening on all interfaces                | `low`      |
//! | anything else                                     | `info`     |
//!
//! The rules apply identically to every tool; tools that don't report flags
//! (lsof, netstat) simply never trigger the flag rules. Degraded lines are
//! always `info`.

use std::net::IpAddr;

use domai_common::{NetworkFields, Severity};

use crate::ports::{self, PortClass};

/// Score the network fields of one event
#[must_use]
pub fn classify(network: &NetworkFields, watchlist: &[IpAddr]) -> Severity {
    if network.addresses().any(|addr| watchlist.contains(&addr)) {
        return Severity::Critical;
    }

    let port_floor = network
        .ports()
        .map(|port| match ports::class_of(port) {
            PortClass::Backdoor => Severity::Critical,
            PortClass::CleartextAdmin => Severity::High,
            PortClass::Sensitive => Severity::Medium,
            PortClass::Ordinary => Severity::Info,
        })
        .max()
        .unwrap_or(Severity::Info);

    let flag_floor = network.flags.map_or(Severity::Info, |flags| {
        if flags.is_scan_signature() {
            Severity::High
        } else if flags.is_connection_attempt() || flags.rst {
            Severity::Low
        } else {
            Severity::Info
        }
    });

    let exposure_floor = if listens_everywhere(network) { Severity::Low } else { Severity::Info };

    port_floor.max(flag_floor).max(exposure_floor)
}

/// Listening socket bound to the wildcard address
fn listens_everywhere(network: &NetworkFields) -> bool {
    network.is_listening() && network.src_addr.is_some_and(|addr| addr.is_unspecified())
}

#[cfg(test)]
mod tests {
    use super::*;
    use domai_common::{Protocol, TcpFlags};
    use std::net::Ipv4Addr;

    fn tcp(src_port: u16, dst_port: u16, flags: TcpFlags) -> NetworkFields {
        NetworkFields {
            protocol: Some(Protocol::Tcp),
            src_addr: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))),
            src_port: Some(src_port),
            dst_addr: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9))),
            dst_port: Some(dst_port),
            flags: Some(flags),
            ..NetworkFields::default()
        }
    }

    #[test]
    fn test_plain_https_traffic_is_info() {
        let ack = TcpFlags { ack: true, ..TcpFlags::default() };
        assert_eq!(classify(&tcp(51000, 443, ack), &[]), Severity::Info);
    }

    #[test]
    fn test_syn_is_low() {
        let syn = TcpFlags { syn: true, ..TcpFlags::default() };
        assert_eq!(classify(&tcp(443, 51000, syn), &[]), Severity::Low);
    }

    #[test]
    fn test_port_classes() {
        let ack = TcpFlags { ack: true, ..TcpFlags::default() };
        assert_eq!(classify(&tcp(51000, 22, ack), &[]), Severity::Medium);
        assert_eq!(classify(&tcp(51000, 23, ack), &[]), Severity::High);
        assert_eq!(classify(&tcp(4444, 51000, ack), &[]), Severity::Critical);
    }

    #[test]
    fn test_null_scan_is_high() {
        assert_eq!(classify(&tcp(51000, 8080, TcpFlags::default()), &[]), Severity::High);
    }

    #[test]
    fn test_watchlist_wins() {
        let ack = TcpFlags { ack: true, ..TcpFlags::default() };
        let watch = [IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9))];
        assert_eq!(classify(&tcp(51000, 443, ack), &watch), Severity::Critical);
    }

    #[test]
    fn test_wildcard_listener_is_low() {
        let network = NetworkFields {
            protocol: Some(Protocol::Tcp),
            src_addr: Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            src_port: Some(8000),
            state: Some("LISTEN".to_string()),
            ..NetworkFields::default()
        };
        assert_eq!(classify(&network, &[]), Severity::Low);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let syn = TcpFlags { syn: true, ..TcpFlags::default() };
        let fields = tcp(51000, 3306, syn);
        assert_eq!(classify(&fields, &[]), classify(&fields, &[]));
    }
}
