//! Bounded per-subscriber queue with the two overflow policies
//!
//! Entries are only ever appended at the back and removed, never reordered,
//! so a queue always holds a subsequence of the production order.

use std::collections::VecDeque;

use domai_common::Severity;

use super::Envelope;

/// What a push did to make room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Overflow {
    /// Room was available
    None,
    /// Knowledge policy: the oldest entry was discarded
    EvictedOldest,
    /// Crisis policy: the oldest entry below the threshold was discarded
    EvictedLowSeverity,
    /// Crisis policy: full of urgent entries, the incoming low entry was refused
    RejectedIncoming,
    /// Crisis policy: full of urgent entries and the incoming one is urgent too
    EvictedUrgent,
}

impl Overflow {
    pub(crate) fn dropped(self) -> bool {
        self != Overflow::None
    }

    pub(crate) fn urgent(self) -> bool {
        self == Overflow::EvictedUrgent
    }
}

#[derive(Debug)]
pub(crate) struct BoundedQueue {
    items: VecDeque<Envelope>,
    capacity: usize,
}

impl BoundedQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { items: VecDeque::with_capacity(capacity.min(1024)), capacity }
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    /// Append, discarding strictly the oldest entry when full
    pub(crate) fn push_oldest_first(&mut self, envelope: Envelope) -> Overflow {
        let overflow = if self.items.len() >= self.capacity {
            self.items.pop_front();
            Overflow::EvictedOldest
        } else {
            Overflow::None
        };
        self.items.push_back(envelope);
        overflow
    }

    /// Append, sacrificing entries below `threshold` before urgent ones
    pub(crate) fn push_severity_biased(&mut self, envelope: Envelope, threshold: Severity) -> Overflow {
        if self.items.len() < self.capacity {
            self.items.push_back(envelope);
            return Overflow::None;
        }

        let overflow = if let Some(pos) = self.items.iter().position(|e| e.severity() < threshold) {
            self.items.remove(pos);
            Overflow::EvictedLowSeverity
        } else if envelope.severity() < threshold {
            return Overflow::RejectedIncoming;
        } else {
            self.items.pop_front();
            Overflow::EvictedUrgent
        };
        self.items.push_back(envelope);
        overflow
    }

    /// Remove up to `max` entries from the front
    pub(crate) fn take(&mut self, max: usize) -> Vec<Envelope> {
        let n = max.min(self.items.len());
        self.items.drain(..n).collect()
    }
}
