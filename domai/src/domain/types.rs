//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep the different integer identifiers apart:
//! a session id can't be handed to something expecting a subscription id,
//! and a dispatch sequence number can't be confused with an event id.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub use domai_common::EventId;

/// User session identifier
///
/// Sessions own a context window and a user profile for their lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session#{}", self.0)
    }
}

/// Dispatcher subscription identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sub#{}", self.0)
    }
}

/// Dispatch sequence number
///
/// Assigned once per published event; every subscriber queue holds entries
/// in strictly increasing sequence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Seq(pub u64);

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Process ID of a supervised tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

impl From<Pid> for i32 {
    #[allow(clippy::cast_possible_wrap)] // kernel pids fit in pid_t
    fn from(pid: Pid) -> Self {
        pid.0 as i32
    }
}

/// Monotonic id source shared by one kind of identifier
#[derive(Debug)]
pub struct IdSequence(AtomicU64);

impl Default for IdSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl IdSequence {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    /// Next raw id; never returns the same value twice
    pub fn next_raw(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Process-wide event id allocator (ids are unique across every parser)
static EVENT_IDS: IdSequence = IdSequence::new();

/// Allocate a fresh event id
pub fn next_event_id() -> EventId {
    EventId(EVENT_IDS.next_raw())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_display() {
        assert_eq!(SessionId(7).to_string(), "Session#7");
    }

    #[test]
    fn test_pid_conversion() {
        let raw: i32 = Pid(1234).into();
        assert_eq!(raw, 1234);
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = next_event_id();
        let b = next_event_id();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_id_sequence_starts_at_one() {
        let seq = IdSequence::new();
        assert_eq!(seq.next_raw(), 1);
        assert_eq!(seq.next_raw(), 2);
        assert_eq!(IdSequence::default().next_raw(), 1);
    }
}
