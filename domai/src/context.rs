//! Context Window: bounded recent-event history for correlation
//!
//! A ring buffer of the last N events seen by a session. "Related" events
//! share at least one of source address, destination port or (known)
//! protocol with the query event and lie within the recency window of its
//! timestamp.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Duration;
use domai_common::SecurityEvent;

#[derive(Debug, Clone)]
pub struct ContextWindow {
    events: VecDeque<Arc<SecurityEvent>>,
    capacity: usize,
}

impl ContextWindow {
    /// A zero capacity is raised to one
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { events: VecDeque::with_capacity(capacity.min(4096)), capacity }
    }

    /// Append, evicting the oldest event when full
    pub fn push(&mut self, event: Arc<SecurityEvent>) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Arc<SecurityEvent>> {
        self.events.iter()
    }

    /// Events correlated with `event`, most recent first
    ///
    /// The query event itself is never part of the result, whether or not it
    /// is stored in the window.
    #[must_use]
    pub fn related(&self, event: &SecurityEvent, recency: Duration) -> Vec<Arc<SecurityEvent>> {
        self.events
            .iter()
            .rev()
            .filter(|candidate| candidate.id != event.id)
            .filter(|candidate| {
                let gap = candidate.timestamp - event.timestamp;
                gap <= recency && gap >= -recency
            })
            .filter(|candidate| correlated(event, candidate))
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

fn correlated(a: &SecurityEvent, b: &SecurityEvent) -> bool {
    let same_source = a.network.src_addr.is_some() && a.network.src_addr == b.network.src_addr;
    let same_port = a.network.dst_port.is_some() && a.network.dst_port == b.network.dst_port;
    let same_protocol = a.protocol().is_known() && a.protocol() == b.protocol();
    same_source || same_port || same_protocol
}
