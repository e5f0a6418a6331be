//! Dispatcher ordering and isolation under concurrent publishers

use std::sync::Arc;
use std::thread;

use chrono::Utc;
use domai::config::DispatchConfig;
use domai::dispatch::{Dispatcher, SubscribeOptions};
use domai::domain::next_event_id;
use domai_common::{EventSource, EventType, NetworkFields, SecurityEvent, Severity, StreamKind, Tier};

fn event(source: EventSource, marker: usize) -> Arc<SecurityEvent> {
    Arc::new(SecurityEvent {
        id: next_event_id(),
        timestamp: Utc::now(),
        source,
        event_type: EventType::Unknown,
        severity: Severity::Info,
        raw: marker.to_string(),
        network: NetworkFields::default(),
        process: None,
        metadata: Default::default(),
        degraded: true,
    })
}

#[test]
fn test_concurrent_publishers_keep_per_producer_order() {
    const PER_PRODUCER: usize = 500;
    let dispatcher = Dispatcher::new(DispatchConfig::default());
    let sub = dispatcher.subscribe(
        StreamKind::Knowledge,
        SubscribeOptions { tier: Tier::Raw, capacity: Some(4 * PER_PRODUCER), ..SubscribeOptions::default() },
    );

    let producers: Vec<_> = [EventSource::Tcpdump, EventSource::Lsof, EventSource::Netstat]
        .into_iter()
        .map(|source| {
            let dispatcher = dispatcher.clone();
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    dispatcher.publish(event(source, i));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let all = sub.try_next_batch(usize::MAX);
    assert_eq!(all.len(), 3 * PER_PRODUCER);
    assert!(all.windows(2).all(|w| w[0].seq < w[1].seq));
    for source in [EventSource::Tcpdump, EventSource::Lsof, EventSource::Netstat] {
        let markers: Vec<usize> = all
            .iter()
            .filter(|e| e.event.source == source)
            .map(|e| e.text.parse().unwrap())
            .collect();
        assert_eq!(markers, (0..PER_PRODUCER).collect::<Vec<_>>());
    }
    assert_eq!(sub.drop_stats().dropped, 0);
}

#[test]
fn test_slow_subscriber_does_not_affect_others() {
    let dispatcher = Dispatcher::new(DispatchConfig::default());
    let slow = dispatcher.subscribe(
        StreamKind::Knowledge,
        SubscribeOptions { capacity: Some(4), ..SubscribeOptions::default() },
    );
    let fast = dispatcher.subscribe(StreamKind::Knowledge, SubscribeOptions::default());

    let mut seen = 0;
    for i in 0..100 {
        dispatcher.publish(event(EventSource::Lsof, i));
        seen += fast.try_next_batch(16).len();
    }
    assert_eq!(seen, 100);
    assert_eq!(slow.pending(), 4);
    assert_eq!(slow.drop_stats().dropped, 96);
    assert_eq!(fast.drop_stats().dropped, 0);

    let kept: Vec<u64> = slow.try_next_batch(16).iter().map(|e| e.seq.0).collect();
    assert!(kept.windows(2).all(|w| w[0] < w[1]));
}
