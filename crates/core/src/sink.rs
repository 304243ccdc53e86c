//! Delivery and instrumentation sinks — the engine's only outbound edges.
//!
//! [`TransportSink`] receives interaction batches and final session records;
//! [`BridgeSink`] receives named milestone events for third-party
//! instrumentation. Both are best-effort: implementations swallow and log
//! their own failures, nothing propagates back into the capture path.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::info;
use uuid::Uuid;

use crate::types::{Interaction, Session};

/// Transmission sink for captured telemetry. Fire-and-forget: neither call
/// may fail into the engine.
pub trait TransportSink: Send + Sync {
    /// Submit an ordered batch of interactions for a session.
    fn submit_batch(&self, session_id: Uuid, user_id: &str, interactions: &[Interaction]);

    /// Submit the full session record. Called exactly once, at session end.
    fn submit_session(&self, session: &Session);
}

/// No-op transport for hosts that only want local capture.
pub struct NoOpTransport;

impl TransportSink for NoOpTransport {
    fn submit_batch(&self, _session_id: Uuid, _user_id: &str, _interactions: &[Interaction]) {}

    fn submit_session(&self, _session: &Session) {}
}

/// In-memory transport that records every submission for tests.
#[derive(Default)]
pub struct CaptureTransport {
    batches: Mutex<Vec<Vec<Interaction>>>,
    sessions: Mutex<Vec<Session>>,
}

impl CaptureTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<Interaction>> {
        self.batches.lock().expect("transport mutex poisoned").clone()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().expect("transport mutex poisoned").len()
    }

    /// All batched interactions in submission order.
    pub fn interactions(&self) -> Vec<Interaction> {
        self.batches
            .lock()
            .expect("transport mutex poisoned")
            .iter()
            .flatten()
            .cloned()
            .collect()
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.lock().expect("transport mutex poisoned").clone()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().expect("transport mutex poisoned").len()
    }
}

impl TransportSink for CaptureTransport {
    fn submit_batch(&self, _session_id: Uuid, _user_id: &str, interactions: &[Interaction]) {
        self.batches
            .lock()
            .expect("transport mutex poisoned")
            .push(interactions.to_vec());
    }

    fn submit_session(&self, session: &Session) {
        self.sessions
            .lock()
            .expect("transport mutex poisoned")
            .push(session.clone());
    }
}

/// Transport that logs submissions through `tracing`.
pub struct ConsoleTransport;

impl TransportSink for ConsoleTransport {
    fn submit_batch(&self, session_id: Uuid, user_id: &str, interactions: &[Interaction]) {
        info!(
            session_id = %session_id,
            user_id = %user_id,
            count = interactions.len(),
            "interaction batch submitted"
        );
    }

    fn submit_session(&self, session: &Session) {
        info!(
            session_id = %session.id,
            user_id = %session.user_id,
            page_views = session.page_views.len(),
            interactions = session.interactions.len(),
            "session record submitted"
        );
    }
}

/// Instrumentation bridge — receives named milestone events (scroll depth,
/// rage click, exit intent, form submit/abandon) with a flat parameter map.
/// Hosts attach zero or more at engine construction.
pub trait BridgeSink: Send + Sync {
    /// Bridge identifier, logged once at startup.
    fn name(&self) -> &str;

    fn record_event(&self, event: &str, params: &BTreeMap<String, String>);
}

/// Bridge that logs events through `tracing`.
pub struct ConsoleBridge;

impl BridgeSink for ConsoleBridge {
    fn name(&self) -> &str {
        "console"
    }

    fn record_event(&self, event: &str, params: &BTreeMap<String, String>) {
        info!(event = event, params = ?params, "bridge event");
    }
}

/// In-memory bridge that captures events for tests.
#[derive(Default)]
pub struct CaptureBridge {
    events: Mutex<Vec<(String, BTreeMap<String, String>)>>,
}

impl CaptureBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.events.lock().expect("bridge mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().expect("bridge mutex poisoned").len()
    }

    pub fn count_named(&self, event: &str) -> usize {
        self.events
            .lock()
            .expect("bridge mutex poisoned")
            .iter()
            .filter(|(name, _)| name == event)
            .count()
    }
}

impl BridgeSink for CaptureBridge {
    fn name(&self) -> &str {
        "capture"
    }

    fn record_event(&self, event: &str, params: &BTreeMap<String, String>) {
        self.events
            .lock()
            .expect("bridge mutex poisoned")
            .push((event.to_string(), params.clone()));
    }
}

/// Convenience: no-op transport.
pub fn noop_transport() -> Arc<dyn TransportSink> {
    Arc::new(NoOpTransport)
}

/// Convenience: capturing transport for tests.
pub fn capture_transport() -> Arc<CaptureTransport> {
    Arc::new(CaptureTransport::new())
}

/// Convenience: capturing bridge for tests.
pub fn capture_bridge() -> Arc<CaptureBridge> {
    Arc::new(CaptureBridge::new())
}
