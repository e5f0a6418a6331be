//! Privilege grants for the wrapped diagnostic tools
//!
//! Each tool needs its own capability. A capability is granted to at most one
//! holder at a time; the runner keeps its grant in a [`GrantGuard`] so the
//! grant goes away on stop, on fatal failure, or when the runner is dropped.

#![allow(unsafe_code)] // geteuid() requires unsafe

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{info, warn};

/// Privilege a capability requires from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrivilegeLevel {
    Normal,
    /// Granted to any user; results may be partial without root
    Elevated,
    /// Requires effective uid 0
    Admin,
}

/// A privileged operation a tool needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    /// Raw packet capture (tcpdump)
    PacketCapture,
    /// Open files and sockets of other processes (lsof)
    ProcessMonitor,
    /// Kernel socket table with owning programs (netstat)
    NetworkMonitor,
}

impl Capability {
    #[must_use]
    pub fn level(self) -> PrivilegeLevel {
        match self {
            Capability::PacketCapture => PrivilegeLevel::Admin,
            Capability::ProcessMonitor | Capability::NetworkMonitor => PrivilegeLevel::Elevated,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::PacketCapture => "packet_capture",
            Capability::ProcessMonitor => "process_monitor",
            Capability::NetworkMonitor => "network_monitor",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permission/privilege collaborator consumed by the tool runner
pub trait PermissionService: Send + Sync {
    /// Whether the capability could be granted right now
    fn check(&self, capability: Capability) -> bool;

    /// Try to take an exclusive grant; `false` means denied
    fn request(&self, capability: Capability) -> bool;

    /// Give a grant back. Releasing something not held is a no-op.
    fn release(&self, capability: Capability);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Requested,
    Granted,
    Denied,
    Released,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub action: AuditAction,
    pub capability: Capability,
}

#[derive(Debug, Default)]
struct GrantTable {
    held: BTreeSet<Capability>,
    audit: Vec<AuditEntry>,
}

impl GrantTable {
    fn record(&mut self, action: AuditAction, capability: Capability) {
        self.audit.push(AuditEntry { at: Utc::now(), action, capability });
    }
}

/// Permission service backed by the process's own credentials
#[derive(Debug)]
pub struct LocalPermissions {
    is_root: bool,
    table: Mutex<GrantTable>,
}

impl LocalPermissions {
    /// Use the effective uid of this process
    #[must_use]
    pub fn new() -> Self {
        Self::with_root(unsafe { libc::geteuid() } == 0)
    }

    /// Fixed privilege, for tests and dry runs
    #[must_use]
    pub fn with_root(is_root: bool) -> Self {
        Self { is_root, table: Mutex::new(GrantTable::default()) }
    }

    fn lock(&self) -> MutexGuard<'_, GrantTable> {
        self.table.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn allowed(&self, capability: Capability) -> bool {
        match capability.level() {
            PrivilegeLevel::Admin => self.is_root,
            PrivilegeLevel::Normal | PrivilegeLevel::Elevated => true,
        }
    }

    /// Capabilities currently granted
    #[must_use]
    pub fn held(&self) -> Vec<Capability> {
        self.lock().held.iter().copied().collect()
    }

    /// Snapshot of every request, grant, denial and release so far
    #[must_use]
    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.lock().audit.clone()
    }
}

impl Default for LocalPermissions {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionService for LocalPermissions {
    fn check(&self, capability: Capability) -> bool {
        self.allowed(capability) && !self.lock().held.contains(&capability)
    }

    fn request(&self, capability: Capability) -> bool {
        let mut table = self.lock();
        table.record(AuditAction::Requested, capability);

        if !self.allowed(capability) {
            table.record(AuditAction::Denied, capability);
            warn!("Denied {capability}: requires root");
            return false;
        }
        if !table.held.insert(capability) {
            table.record(AuditAction::Denied, capability);
            warn!("Denied {capability}: already granted to another runner");
            return false;
        }

        table.record(AuditAction::Granted, capability);
        if capability.level() == PrivilegeLevel::Elevated && !self.is_root {
            warn!("Granted {capability} without root; output may be incomplete");
        } else {
            info!("Granted {capability}");
        }
        true
    }

    fn release(&self, capability: Capability) {
        let mut table = self.lock();
        if table.held.remove(&capability) {
            table.record(AuditAction::Released, capability);
            info!("Released {capability}");
        }
    }
}

/// A held capability, released when dropped
pub struct GrantGuard {
    service: Arc<dyn PermissionService>,
    capability: Capability,
}

impl GrantGuard {
    /// Request `capability`, returning `None` when it's denied
    #[must_use]
    pub fn acquire(service: Arc<dyn PermissionService>, capability: Capability) -> Option<Self> {
        service.request(capability).then(|| Self { service, capability })
    }

    #[must_use]
    pub fn capability(&self) -> Capability {
        self.capability
    }
}

impl fmt::Debug for GrantGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrantGuard").field("capability", &self.capability).finish()
    }
}

impl Drop for GrantGuard {
    fn drop(&mut self) {
        self.service.release(self.capability);
    }
}
