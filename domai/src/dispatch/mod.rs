//! Dual-Stream Dispatcher
//!
//! Fans every published event out to two logically independent streams:
//!
//! - **crisis**: action-oriented alert text, biased toward high severity
//! - **knowledge**: the tier-adapted explanation of the same event
//!
//! Each [`Subscription`] owns its own bounded queue, so a slow consumer only
//! ever loses its own entries. Publishing never waits on consumers: when a
//! queue is full the stream's overflow policy drops something and the drop is
//! counted.
//!
//! ```text
//!                          ┌─► [crisis q, sub 1] ──► next_batch()
//!  publish(event) ─seq─►───┼─► [crisis q, sub 2] ──► next_batch()
//!   (publish lock)         └─► [knowledge q, sub 3 @ tier] ──► next_batch()
//! ```
//!
//! A global sequence number is assigned under the publish lock and fan-out
//! happens under the same lock, so every queue holds its entries in
//! production order even with concurrent publishers.

mod queue;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use domai_common::{OutboundRecord, SecurityEvent, Severity, StreamKind, Tier};
use log::{debug, warn};
use tokio::sync::Notify;

use crate::config::DispatchConfig;
use crate::domain::{IdSequence, Seq, SubscriptionId};
use crate::render::{self, RenderOptions};

use queue::{BoundedQueue, Overflow};

/// Log the first drop of a subscription and then every this many
const DROP_LOG_INTERVAL: u64 = 1000;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Envelopes and statistics
// ============================================================================

/// One event with its rendered text, as delivered on one stream
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub seq: Seq,
    pub stream: StreamKind,
    pub tier: Tier,
    pub text: String,
    pub event: Arc<SecurityEvent>,
}

impl Envelope {
    #[must_use]
    pub fn severity(&self) -> Severity {
        self.event.severity
    }

    /// Serialized form for the transport layer
    #[must_use]
    pub fn to_record(&self) -> OutboundRecord {
        let event = &*self.event;
        OutboundRecord {
            seq: self.seq.0,
            id: event.id,
            timestamp: event.timestamp,
            source: event.source,
            event_type: event.event_type,
            severity: event.severity,
            raw: event.raw.clone(),
            network: event.network.clone(),
            process: event.process.clone(),
            metadata: event.metadata.clone(),
            degraded: event.degraded,
            stream: self.stream,
            tier: self.tier,
            explanation: self.text.clone(),
        }
    }
}

/// Entries lost to overflow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropStats {
    /// Every entry lost, whatever its severity
    pub dropped: u64,
    /// Subset of `dropped` at or above the crisis threshold
    pub urgent_dropped: u64,
}

#[derive(Debug, Default)]
struct DropCounters {
    dropped: AtomicU64,
    urgent_dropped: AtomicU64,
}

impl DropCounters {
    /// Returns the new total
    fn record(&self, overflow: Overflow) -> u64 {
        if overflow.urgent() {
            self.urgent_dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn snapshot(&self) -> DropStats {
        DropStats {
            dropped: self.dropped.load(Ordering::Relaxed),
            urgent_dropped: self.urgent_dropped.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Subscriptions
// ============================================================================

/// Per-subscription filter and presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub tier: Tier,
    /// Events below this severity are never enqueued
    pub min_severity: Severity,
    /// Queue size; `None` uses the stream default from the config
    pub capacity: Option<usize>,
    pub render: RenderOptions,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self { tier: Tier::Novice, min_severity: Severity::Info, capacity: None, render: RenderOptions::default() }
    }
}

struct Slot {
    id: SubscriptionId,
    stream: StreamKind,
    min_severity: Severity,
    render: RenderOptions,
    tier: Mutex<Tier>,
    queue: Mutex<BoundedQueue>,
    notify: Notify,
    closed: AtomicBool,
    drops: DropCounters,
}

impl Slot {
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }
}

/// Capability handle for one stream subscription
///
/// Dropping the handle unsubscribes.
pub struct Subscription {
    slot: Arc<Slot>,
    dispatcher: Weak<Inner>,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.slot.id
    }

    #[must_use]
    pub fn stream(&self) -> StreamKind {
        self.slot.stream
    }

    #[must_use]
    pub fn tier(&self) -> Tier {
        *lock(&self.slot.tier)
    }

    /// Change the tier used for entries published from now on
    pub fn set_tier(&self, tier: Tier) {
        *lock(&self.slot.tier) = tier;
    }

    /// Entries waiting in this subscription's queue
    #[must_use]
    pub fn pending(&self) -> usize {
        lock(&self.slot.queue).len()
    }

    /// Take up to `max` queued entries without waiting
    #[must_use]
    pub fn try_next_batch(&self, max: usize) -> Vec<Envelope> {
        lock(&self.slot.queue).take(max.max(1))
    }

    /// Wait for at least one entry, then take up to `max`
    ///
    /// Returns an empty batch once the dispatcher has shut down and the queue
    /// is drained.
    pub async fn next_batch(&self, max: usize) -> Vec<Envelope> {
        loop {
            let batch = self.try_next_batch(max);
            if !batch.is_empty() || self.slot.closed.load(Ordering::Acquire) {
                return batch;
            }
            self.slot.notify.notified().await;
        }
    }

    #[must_use]
    pub fn drop_stats(&self) -> DropStats {
        self.slot.drops.snapshot()
    }

    /// Explicit form of dropping the handle
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.dispatcher.upgrade() {
            lock(&inner.subscribers).remove(&self.slot.id);
            debug!("{} unsubscribed from {}", self.slot.id, self.slot.stream);
        }
        self.slot.closed.store(true, Ordering::Release);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.slot.id)
            .field("stream", &self.slot.stream)
            .field("tier", &self.tier())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

struct Inner {
    config: DispatchConfig,
    /// Next sequence number; held for the whole fan-out
    publish: Mutex<u64>,
    subscribers: Mutex<HashMap<SubscriptionId, Arc<Slot>>>,
    ids: IdSequence,
    crisis_drops: DropCounters,
    knowledge_drops: DropCounters,
    closed: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for slot in lock(&self.subscribers).values() {
            slot.close();
        }
    }
}

/// Cheaply cloneable handle; clones share subscribers and sequence numbers
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                publish: Mutex::new(1),
                subscribers: Mutex::new(HashMap::new()),
                ids: IdSequence::new(),
                crisis_drops: DropCounters::default(),
                knowledge_drops: DropCounters::default(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn subscribe(&self, stream: StreamKind, opts: SubscribeOptions) -> Subscription {
        let default_capacity = match stream {
            StreamKind::Crisis => self.inner.config.crisis_capacity,
            StreamKind::Knowledge => self.inner.config.knowledge_capacity,
        };
        let slot = Arc::new(Slot {
            id: SubscriptionId(self.inner.ids.next_raw()),
            stream,
            min_severity: opts.min_severity,
            render: opts.render,
            tier: Mutex::new(opts.tier),
            queue: Mutex::new(BoundedQueue::new(opts.capacity.unwrap_or(default_capacity))),
            notify: Notify::new(),
            closed: AtomicBool::new(self.inner.closed.load(Ordering::Acquire)),
            drops: DropCounters::default(),
        });
        lock(&self.inner.subscribers).insert(slot.id, Arc::clone(&slot));
        debug!("{} subscribed to {stream} at tier {}", slot.id, opts.tier);
        Subscription { slot, dispatcher: Arc::downgrade(&self.inner) }
    }

    /// Fan `event` out to every matching subscription
    ///
    /// Never waits on consumers. Returns the sequence number assigned.
    pub fn publish(&self, event: Arc<SecurityEvent>) -> Seq {
        let mut next = lock(&self.inner.publish);
        let seq = Seq(*next);
        *next += 1;

        let slots: Vec<Arc<Slot>> = lock(&self.inner.subscribers).values().cloned().collect();
        let mut crisis_text: Vec<(RenderOptions, String)> = Vec::new();
        let mut rendered: Vec<((Tier, RenderOptions), String)> = Vec::new();

        for slot in slots {
            if event.severity < slot.min_severity {
                continue;
            }
            let tier = *lock(&slot.tier);
            let text = match slot.stream {
                StreamKind::Crisis => {
                    if let Some((_, text)) = crisis_text.iter().find(|(k, _)| *k == slot.render) {
                        text.clone()
                    } else {
                        let text = render::crisis_message_with(&event, slot.render);
                        crisis_text.push((slot.render, text.clone()));
                        text
                    }
                }
                StreamKind::Knowledge => {
                    let key = (tier, slot.render);
                    if let Some((_, text)) = rendered.iter().find(|(k, _)| *k == key) {
                        text.clone()
                    } else {
                        let text = render::render_with(&event, tier, slot.render);
                        rendered.push((key, text.clone()));
                        text
                    }
                }
            };
            let envelope = Envelope { seq, stream: slot.stream, tier, text, event: Arc::clone(&event) };
            self.enqueue(&slot, envelope);
        }
        seq
    }

    fn enqueue(&self, slot: &Slot, envelope: Envelope) {
        let overflow = {
            let mut queue = lock(&slot.queue);
            match slot.stream {
                StreamKind::Knowledge => queue.push_oldest_first(envelope),
                StreamKind::Crisis => queue.push_severity_biased(envelope, self.inner.config.crisis_drop_below),
            }
        };

        if overflow.dropped() {
            let total = slot.drops.record(overflow);
            match slot.stream {
                StreamKind::Crisis => self.inner.crisis_drops.record(overflow),
                StreamKind::Knowledge => self.inner.knowledge_drops.record(overflow),
            };
            if total == 1 || total % DROP_LOG_INTERVAL == 0 {
                warn!("{} on {} stream is falling behind: {total} entries dropped", slot.id, slot.stream);
            }
        }
        if overflow != Overflow::RejectedIncoming {
            slot.notify.notify_one();
        }
    }

    /// Drops aggregated over every subscription of `stream`, past and present
    #[must_use]
    pub fn drop_stats(&self, stream: StreamKind) -> DropStats {
        match stream {
            StreamKind::Crisis => self.inner.crisis_drops.snapshot(),
            StreamKind::Knowledge => self.inner.knowledge_drops.snapshot(),
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    /// Number of events published so far
    #[must_use]
    pub fn published(&self) -> u64 {
        *lock(&self.inner.publish) - 1
    }

    /// Wake every consumer; batches come back empty once their queue drains
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        for slot in lock(&self.inner.subscribers).values() {
            slot.close();
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("subscribers", &self.subscriber_count())
            .field("published", &self.published())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domai_common::{EventSource, EventType, NetworkFields};
    use std::collections::BTreeMap;

    fn event(severity: Severity, tag: &str) -> Arc<SecurityEvent> {
        Arc::new(SecurityEvent {
            id: crate::domain::next_event_id(),
            timestamp: Utc::now(),
            source: EventSource::Tcpdump,
            event_type: EventType::Connection,
            severity,
            raw: tag.to_string(),
            network: NetworkFields::default(),
            process: None,
            metadata: BTreeMap::new(),
            degraded: false,
        })
    }

    fn raws(batch: &[Envelope]) -> Vec<&str> {
        batch.iter().map(|e| e.event.raw.as_str()).collect()
    }

    fn small(capacity: usize, tier: Tier) -> SubscribeOptions {
        SubscribeOptions { tier, capacity: Some(capacity), ..SubscribeOptions::default() }
    }

    #[test]
    fn test_both_streams_receive_every_event() {
        let dispatcher = Dispatcher::new(DispatchConfig::default());
        let crisis = dispatcher.subscribe(StreamKind::Crisis, SubscribeOptions::default());
        let knowledge = dispatcher.subscribe(StreamKind::Knowledge, small(8, Tier::Raw));

        dispatcher.publish(event(Severity::Low, "a"));
        dispatcher.publish(event(Severity::High, "b"));

        let c = crisis.try_next_batch(10);
        let k = knowledge.try_next_batch(10);
        assert_eq!(raws(&c), vec!["a", "b"]);
        assert_eq!(k.iter().map(|e| e.text.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(c[1].text.starts_with("ALERT"));
        assert!(c[0].seq < c[1].seq);
    }

    #[test]
    fn test_knowledge_drops_strictly_oldest() {
        let dispatcher = Dispatcher::new(DispatchConfig::default());
        let sub = dispatcher.subscribe(StreamKind::Knowledge, small(3, Tier::Raw));
        for (i, sev) in [Severity::Critical, Severity::Info, Severity::High, Severity::Low, Severity::Info]
            .into_iter()
            .enumerate()
        {
            dispatcher.publish(event(sev, &i.to_string()));
        }
        assert_eq!(raws(&sub.try_next_batch(10)), vec!["2", "3", "4"]);
        assert_eq!(sub.drop_stats().dropped, 2);
        assert_eq!(dispatcher.drop_stats(StreamKind::Knowledge).dropped, 2);
    }

    #[test]
    fn test_crisis_drops_low_severity_first() {
        let dispatcher = Dispatcher::new(DispatchConfig::default());
        let sub = dispatcher.subscribe(StreamKind::Crisis, small(3, Tier::Novice));

        dispatcher.publish(event(Severity::High, "h1"));
        dispatcher.publish(event(Severity::Low, "l1"));
        dispatcher.publish(event(Severity::Critical, "c1"));
        // Full: the low entry makes room, order of the rest is kept
        dispatcher.publish(event(Severity::High, "h2"));
        // Full of urgent entries: an incoming low entry is refused
        dispatcher.publish(event(Severity::Info, "i1"));

        assert_eq!(raws(&sub.try_next_batch(10)), vec!["h1", "c1", "h2"]);
        let stats = sub.drop_stats();
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.urgent_dropped, 0);
    }

    #[test]
    fn test_crisis_full_of_urgent_evicts_oldest_and_counts_it() {
        let dispatcher = Dispatcher::new(DispatchConfig::default());
        let sub = dispatcher.subscribe(StreamKind::Crisis, small(2, Tier::Novice));
        for tag in ["c1", "c2", "c3"] {
            dispatcher.publish(event(Severity::Critical, tag));
        }
        assert_eq!(raws(&sub.try_next_batch(10)), vec!["c2", "c3"]);
        assert_eq!(sub.drop_stats(), DropStats { dropped: 1, urgent_dropped: 1 });
    }

    #[test]
    fn test_min_severity_filter() {
        let dispatcher = Dispatcher::new(DispatchConfig::default());
        let opts = SubscribeOptions { min_severity: Severity::High, ..SubscribeOptions::default() };
        let sub = dispatcher.subscribe(StreamKind::Crisis, opts);
        dispatcher.publish(event(Severity::Medium, "m"));
        dispatcher.publish(event(Severity::Critical, "c"));
        assert_eq!(raws(&sub.try_next_batch(10)), vec!["c"]);
    }

    #[test]
    fn test_slow_consumer_does_not_affect_other_stream() {
        let dispatcher = Dispatcher::new(DispatchConfig::default());
        let slow = dispatcher.subscribe(StreamKind::Knowledge, small(1, Tier::Raw));
        let fast = dispatcher.subscribe(StreamKind::Crisis, small(100, Tier::Novice));
        for i in 0..50 {
            dispatcher.publish(event(Severity::Info, &i.to_string()));
        }
        assert_eq!(fast.try_next_batch(100).len(), 50);
        assert_eq!(fast.drop_stats().dropped, 0);
        assert_eq!(slow.drop_stats().dropped, 49);
    }

    #[test]
    fn test_unsubscribe_on_drop() {
        let dispatcher = Dispatcher::new(DispatchConfig::default());
        let sub = dispatcher.subscribe(StreamKind::Crisis, SubscribeOptions::default());
        assert_eq!(dispatcher.subscriber_count(), 1);
        sub.unsubscribe();
        assert_eq!(dispatcher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_next_batch_wakes_on_publish() {
        let dispatcher = Dispatcher::new(DispatchConfig::default());
        let sub = dispatcher.subscribe(StreamKind::Knowledge, small(8, Tier::Raw));
        let publisher = dispatcher.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            publisher.publish(event(Severity::Info, "late"));
        });
        let batch = sub.next_batch(4).await;
        assert_eq!(raws(&batch), vec!["late"]);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_releases_waiting_consumer() {
        let dispatcher = Dispatcher::new(DispatchConfig::default());
        let sub = dispatcher.subscribe(StreamKind::Crisis, SubscribeOptions::default());
        let closer = dispatcher.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            closer.close();
        });
        assert!(sub.next_batch(4).await.is_empty());
    }

    #[test]
    fn test_crisis_text_follows_subscriber_redaction() {
        let dispatcher = Dispatcher::new(DispatchConfig::default());
        let redact = RenderOptions { redact_addresses: true };
        let private = dispatcher.subscribe(
            StreamKind::Crisis,
            SubscribeOptions { render: redact, ..SubscribeOptions::default() },
        );
        let plain = dispatcher.subscribe(StreamKind::Crisis, SubscribeOptions::default());

        let mut e = (*event(Severity::Low, "x")).clone();
        e.network = NetworkFields {
            protocol: Some(domai_common::Protocol::Tcp),
            src_addr: Some("10.0.0.5".parse().unwrap()),
            src_port: Some(443),
            dst_addr: Some("10.0.0.9".parse().unwrap()),
            dst_port: Some(51000),
            ..NetworkFields::default()
        };
        dispatcher.publish(Arc::new(e));

        let hidden = &private.try_next_batch(1)[0].text;
        assert!(!hidden.contains("10.0.0."), "{hidden}");
        assert!(hidden.contains("<redacted>"), "{hidden}");
        assert!(plain.try_next_batch(1)[0].text.contains("10.0.0.5"));
    }

    #[test]
    fn test_record_carries_stream_and_tier() {
        let dispatcher = Dispatcher::new(DispatchConfig::default());
        let sub = dispatcher.subscribe(StreamKind::Knowledge, small(4, Tier::Expert));
        dispatcher.publish(event(Severity::Low, "x"));
        let record = sub.try_next_batch(1)[0].to_record();
        assert_eq!(record.stream, StreamKind::Knowledge);
        assert_eq!(record.tier, Tier::Expert);
        assert!(record.explanation.ends_with('x'));
    }
}
