//! Well-known port knowledge shared by severity scoring, rendering and
//! learning-topic selection.
//!
//! # Port Classes
//!
//! 1. **Backdoor** - ports that legitimate software essentially never uses
//!    but remote-access trojans and exploit frameworks do (4444, 31337, ...)
//! 2. **Cleartext admin** - remote administration without encryption
//!    (telnet, ftp, the r-commands)
//! 3. **Sensitive** - encrypted remote access, databases and file sharing;
//!    fine on their own, interesting when exposed
//! 4. **Ordinary** - everything else, including every port not listed here
//!
//! The tables are static; lookups are a linear scan over a few dozen entries.

use domai_common::NetworkFields;

/// Coarse grouping of a service, used for wording and learning topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortCategory {
    Web,
    Email,
    NameService,
    RemoteAccess,
    Database,
    FileSharing,
    Backdoor,
    Other,
}

impl PortCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PortCategory::Web => "web",
            PortCategory::Email => "email",
            PortCategory::NameService => "name_service",
            PortCategory::RemoteAccess => "remote_access",
            PortCategory::Database => "database",
            PortCategory::FileSharing => "file_sharing",
            PortCategory::Backdoor => "backdoor",
            PortCategory::Other => "other",
        }
    }
}

/// Risk class of a port, ordered from least to most alarming
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PortClass {
    Ordinary,
    Sensitive,
    CleartextAdmin,
    Backdoor,
}

/// One row of the service table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortInfo {
    pub port: u16,
    /// Short service name (`ssh`, `https`)
    pub service: &'static str,
    /// Plain-language phrase for novice explanations
    pub phrase: &'static str,
    pub category: PortCategory,
    pub class: PortClass,
}

const fn entry(
    port: u16,
    service: &'static str,
    phrase: &'static str,
    category: PortCategory,
    class: PortClass,
) -> PortInfo {
    PortInfo { port, service, phrase, category, class }
}

use PortCategory as C;
use PortClass as K;

/// Services the monitor knows by port number
pub const WELL_KNOWN_PORTS: &[PortInfo] = &[
    entry(20, "ftp-data", "file transfer (FTP data)", C::FileSharing, K::CleartextAdmin),
    entry(21, "ftp", "unencrypted file transfer (FTP)", C::FileSharing, K::CleartextAdmin),
    entry(22, "ssh", "secure remote login (SSH)", C::RemoteAccess, K::Sensitive),
    entry(23, "telnet", "unencrypted remote login (Telnet)", C::RemoteAccess, K::CleartextAdmin),
    entry(25, "smtp", "email delivery (SMTP)", C::Email, K::Ordinary),
    entry(53, "dns", "name lookup (DNS)", C::NameService, K::Ordinary),
    entry(67, "dhcp", "network address assignment (DHCP)", C::NameService, K::Ordinary),
    entry(68, "dhcp", "network address assignment (DHCP)", C::NameService, K::Ordinary),
    entry(69, "tftp", "unauthenticated file transfer (TFTP)", C::FileSharing, K::CleartextAdmin),
    entry(80, "http", "web connection", C::Web, K::Ordinary),
    entry(110, "pop3", "email download (POP3)", C::Email, K::Ordinary),
    entry(111, "rpcbind", "remote procedure call lookup (RPC)", C::FileSharing, K::Sensitive),
    entry(123, "ntp", "time synchronization (NTP)", C::NameService, K::Ordinary),
    entry(139, "netbios", "Windows file sharing (NetBIOS)", C::FileSharing, K::Sensitive),
    entry(143, "imap", "email access (IMAP)", C::Email, K::Ordinary),
    entry(443, "https", "secure web connection", C::Web, K::Ordinary),
    entry(445, "smb", "Windows file sharing (SMB)", C::FileSharing, K::Sensitive),
    entry(465, "smtps", "secure email delivery", C::Email, K::Ordinary),
    entry(512, "rexec", "unencrypted remote command execution", C::RemoteAccess, K::CleartextAdmin),
    entry(513, "rlogin", "unencrypted remote login (rlogin)", C::RemoteAccess, K::CleartextAdmin),
    entry(514, "rsh", "unencrypted remote shell (rsh)", C::RemoteAccess, K::CleartextAdmin),
    entry(587, "submission", "email submission", C::Email, K::Ordinary),
    entry(993, "imaps", "secure email access", C::Email, K::Ordinary),
    entry(995, "pop3s", "secure email download", C::Email, K::Ordinary),
    entry(1433, "mssql", "database connection (SQL Server)", C::Database, K::Sensitive),
    entry(1521, "oracle", "database connection (Oracle)", C::Database, K::Sensitive),
    entry(2049, "nfs", "network file sharing (NFS)", C::FileSharing, K::Sensitive),
    entry(3306, "mysql", "database connection (MySQL)", C::Database, K::Sensitive),
    entry(3389, "rdp", "remote desktop (RDP)", C::RemoteAccess, K::Sensitive),
    entry(4444, "backdoor", "connection on a port favored by hacking tools", C::Backdoor, K::Backdoor),
    entry(5432, "postgres", "database connection (PostgreSQL)", C::Database, K::Sensitive),
    entry(5900, "vnc", "remote desktop (VNC)", C::RemoteAccess, K::Sensitive),
    entry(5985, "winrm", "remote Windows management", C::RemoteAccess, K::Sensitive),
    entry(5986, "winrm", "remote Windows management", C::RemoteAccess, K::Sensitive),
    entry(6379, "redis", "database connection (Redis)", C::Database, K::Sensitive),
    entry(8080, "http-alt", "web connection", C::Web, K::Ordinary),
    entry(8443, "https-alt", "secure web connection", C::Web, K::Ordinary),
    entry(9200, "elasticsearch", "search database connection", C::Database, K::Sensitive),
    entry(12345, "netbus", "connection on a known trojan port", C::Backdoor, K::Backdoor),
    entry(27017, "mongodb", "database connection (MongoDB)", C::Database, K::Sensitive),
    entry(27374, "subseven", "connection on a known trojan port", C::Backdoor, K::Backdoor),
    entry(31337, "backdoor", "connection on a port favored by hacking tools", C::Backdoor, K::Backdoor),
];

/// Look up a port in the service table
#[must_use]
pub fn lookup(port: u16) -> Option<&'static PortInfo> {
    WELL_KNOWN_PORTS.iter().find(|info| info.port == port)
}

/// Risk class of a single port; unlisted ports are ordinary
#[must_use]
pub fn class_of(port: u16) -> PortClass {
    lookup(port).map_or(PortClass::Ordinary, |info| info.class)
}

/// The service an event is about: destination port first, then source
///
/// Replies from a server carry the service port on the source side, so
/// `10.0.0.5.443 > 10.0.0.9.51000` is still recognized as HTTPS.
#[must_use]
pub fn service_of(network: &NetworkFields) -> Option<&'static PortInfo> {
    network.ports().find_map(lookup)
}
