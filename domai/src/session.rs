//! User sessions: a profile plus a private context window
//!
//! The manager is shared between the pipeline tasks (which record every
//! event into every open session) and whoever asks for analyses. Windows are
//! owned by their session and discarded when it closes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use domai_common::{EventId, EventType, Protocol, SecurityEvent, Tier};
use log::info;
use serde_json::json;

use crate::config::ContextConfig;
use crate::context::ContextWindow;
use crate::domain::{IdSequence, SessionId};
use crate::ports::{self, PortClass};
use crate::profile::UserProfile;
use crate::render::{self, RenderOptions};

/// Everything known about one event for one user, built on demand
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub event: Arc<SecurityEvent>,
    pub explanation: String,
    /// Structured fields for consumers that want more than text
    pub technical_detail: serde_json::Value,
    /// Tier actually used for `explanation`
    pub tier: Tier,
    pub related: Vec<EventId>,
    pub learning_opportunities: Vec<String>,
}

#[derive(Debug)]
struct Session {
    profile: UserProfile,
    window: ContextWindow,
    opened_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct SessionManager {
    config: ContextConfig,
    ids: IdSequence,
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl SessionManager {
    #[must_use]
    pub fn new(config: ContextConfig) -> Self {
        Self { config, ids: IdSequence::new(), sessions: Mutex::new(HashMap::new()) }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn open(&self, profile: UserProfile) -> SessionId {
        let id = SessionId(self.ids.next_raw());
        info!("Opened {id} for profile '{}' (tier {})", profile.id, profile.expertise);
        let session =
            Session { profile, window: ContextWindow::new(self.config.capacity), opened_at: Utc::now() };
        self.lock().insert(id, session);
        id
    }

    /// Discard the session and its window, handing back the profile
    pub fn close(&self, id: SessionId) -> Option<UserProfile> {
        let session = self.lock().remove(&id)?;
        info!(
            "Closed {id} after {}s ({} events in window)",
            (Utc::now() - session.opened_at).num_seconds(),
            session.window.len()
        );
        Some(session.profile)
    }

    #[must_use]
    pub fn is_open(&self, id: SessionId) -> bool {
        self.lock().contains_key(&id)
    }

    #[must_use]
    pub fn open_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn profile(&self, id: SessionId) -> Option<UserProfile> {
        self.lock().get(&id).map(|s| s.profile.clone())
    }

    /// Apply a change to a session's profile; `false` if the session is gone
    pub fn update_profile(&self, id: SessionId, change: impl FnOnce(&mut UserProfile)) -> bool {
        match self.lock().get_mut(&id) {
            Some(session) => {
                change(&mut session.profile);
                true
            }
            None => false,
        }
    }

    /// Append `event` to every open session's window
    pub fn record(&self, event: &Arc<SecurityEvent>) {
        for session in self.lock().values_mut() {
            session.window.push(Arc::clone(event));
        }
    }

    #[must_use]
    pub fn window_len(&self, id: SessionId) -> Option<usize> {
        self.lock().get(&id).map(|s| s.window.len())
    }

    /// Explain `event` for this session's user
    ///
    /// An explicit `requested` tier overrides the profile's expertise.
    #[must_use]
    pub fn analyze(
        &self,
        id: SessionId,
        event: &Arc<SecurityEvent>,
        requested: Option<Tier>,
    ) -> Option<AnalysisResult> {
        let sessions = self.lock();
        let session = sessions.get(&id)?;
        let tier = render::select_tier(&session.profile, requested);
        let explanation = render::render_with(event, tier, RenderOptions::for_profile(&session.profile));
        let related = session
            .window
            .related(event, self.config.correlation_window())
            .iter()
            .map(|e| e.id)
            .collect();
        let learning_opportunities = learning_topics(event)
            .into_iter()
            .filter(|topic| !session.profile.progress.completed_topics.contains(topic))
            .collect();

        Some(AnalysisResult {
            event: Arc::clone(event),
            explanation,
            technical_detail: technical_detail(event),
            tier,
            related,
            learning_opportunities,
        })
    }
}

fn technical_detail(event: &SecurityEvent) -> serde_json::Value {
    let service = ports::service_of(&event.network).map(|info| info.service);
    json!({
        "id": event.id,
        "source": event.source,
        "type": event.event_type,
        "severity": event.severity,
        "timestamp": event.timestamp,
        "network": event.network,
        "process": event.process,
        "service": service,
        "metadata": event.metadata,
        "degraded": event.degraded,
    })
}

/// Topics a user could learn about from this event, most specific first
#[must_use]
pub fn learning_topics(event: &SecurityEvent) -> Vec<String> {
    let mut topics: Vec<String> = Vec::new();
    let mut add = |topic: String| {
        if !topics.contains(&topic) {
            topics.push(topic);
        }
    };

    if event.degraded {
        add("reading-raw-output".to_string());
        return topics;
    }

    let net = &event.network;
    if let Some(flags) = net.flags {
        if flags.is_scan_signature() {
            add("port-scanning".to_string());
        }
        if flags.is_connection_attempt() || (flags.syn && flags.ack) {
            add("tcp-handshake".to_string());
        }
        if flags.rst {
            add("connection-resets".to_string());
        }
    }
    for port in net.ports() {
        match ports::class_of(port) {
            PortClass::Backdoor => add("backdoor-ports".to_string()),
            PortClass::CleartextAdmin => add("cleartext-protocols".to_string()),
            PortClass::Sensitive | PortClass::Ordinary => {}
        }
    }
    if let Some(info) = ports::service_of(net) {
        add(format!("service:{}", info.service));
    }
    match event.event_type {
        EventType::ListeningSocket => add("listening-sockets".to_string()),
        EventType::FileAccess => add("file-descriptors".to_string()),
        EventType::ProcessLaunch => add("process-monitoring".to_string()),
        EventType::Connection | EventType::Unknown => {}
    }
    if event.protocol() == Protocol::Arp {
        add("arp".to_string());
    }
    topics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParserConfig;
    use crate::parser::LineParser;
    use domai_common::EventSource;

    fn tcpdump(line: &str) -> Arc<SecurityEvent> {
        Arc::new(LineParser::new(EventSource::Tcpdump, ParserConfig::default()).parse(line).unwrap())
    }

    #[test]
    fn test_analysis_uses_profile_tier_unless_overridden() {
        let manager = SessionManager::new(ContextConfig::default());
        let id = manager.open(UserProfile::new("u", Tier::Expert));
        let event = tcpdump("2024-01-01 10:00:00.000000 TCP 10.0.0.5.443 > 10.0.0.9.51000: Flags [S]");

        let default = manager.analyze(id, &event, None).unwrap();
        assert_eq!(default.tier, Tier::Expert);
        let raw = manager.analyze(id, &event, Some(Tier::Raw)).unwrap();
        assert_eq!(raw.explanation, event.raw);
        assert_eq!(raw.technical_detail["network"]["dst_port"], 51000);
    }

    #[test]
    fn test_related_events_come_from_session_window() {
        let manager = SessionManager::new(ContextConfig::default());
        let id = manager.open(UserProfile::default());
        let first = tcpdump("2024-01-01 10:00:00.000000 IP 10.0.0.5.40000 > 10.0.0.9.22: Flags [S], length 0");
        let second = tcpdump("2024-01-01 10:00:01.000000 IP 10.0.0.5.40001 > 10.0.0.9.22: Flags [S], length 0");
        manager.record(&first);
        manager.record(&second);

        let result = manager.analyze(id, &second, None).unwrap();
        assert_eq!(result.related, vec![first.id]);
    }

    #[test]
    fn test_completed_topics_are_filtered() {
        let manager = SessionManager::new(ContextConfig::default());
        let mut profile = UserProfile::default();
        profile.complete_topic("tcp-handshake");
        let id = manager.open(profile);
        let event = tcpdump("2024-01-01 10:00:00.000000 IP 10.0.0.5.40000 > 10.0.0.9.22: Flags [S], length 0");

        let result = manager.analyze(id, &event, None).unwrap();
        assert_eq!(result.learning_opportunities, vec!["service:ssh".to_string()]);
    }

    #[test]
    fn test_closed_session_is_gone() {
        let manager = SessionManager::new(ContextConfig::default());
        let id = manager.open(UserProfile::new("gone", Tier::Novice));
        manager.record(&tcpdump("junk"));
        assert_eq!(manager.window_len(id), Some(1));

        let profile = manager.close(id).unwrap();
        assert_eq!(profile.id, "gone");
        assert!(!manager.is_open(id));
        assert!(manager.window_len(id).is_none());
        assert!(manager.analyze(id, &tcpdump("junk"), None).is_none());
    }

    #[test]
    fn test_scan_topics() {
        let event = tcpdump("2024-01-01 10:00:00.000000 IP 10.0.0.66.40000 > 10.0.0.9.23: Flags [none], length 0");
        let topics = learning_topics(&event);
        assert_eq!(topics[0], "port-scanning");
        assert!(topics.contains(&"cleartext-protocols".to_string()));
        assert!(topics.contains(&"service:telnet".to_string()));
    }
}
