//! Session lifecycle — creation, same-tab reload recovery, persistence, and
//! idempotent session end.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use pulse_core::ports::{Clock, DurableStore, EnvironmentInfo, EphemeralStore};
use pulse_core::sink::TransportSink;
use pulse_core::types::Session;

use crate::context;

/// Durable-storage key for the stable user identifier.
pub const USER_ID_KEY: &str = "pp_user_id";
/// Ephemeral-storage key for the serialized live session.
pub const SESSION_KEY: &str = "pp_session";

/// Owns the current session record and its create/load/persist/end
/// lifecycle.
pub struct SessionStore {
    durable: Arc<dyn DurableStore>,
    ephemeral: Arc<dyn EphemeralStore>,
}

impl SessionStore {
    pub fn new(durable: Arc<dyn DurableStore>, ephemeral: Arc<dyn EphemeralStore>) -> Self {
        Self { durable, ephemeral }
    }

    /// Recover the session from ephemeral storage when present and
    /// parseable, else build a fresh one. Corrupt recovered data is treated
    /// as "no session found", never as an error.
    pub fn get_or_create(&self, clock: &dyn Clock, env: &dyn EnvironmentInfo) -> Session {
        if let Some(raw) = self.ephemeral.get(SESSION_KEY) {
            match serde_json::from_str::<Session>(&raw) {
                Ok(session) if session.ended_at.is_none() => {
                    debug!(session_id = %session.id, "session recovered from tab storage");
                    return session;
                }
                Ok(stale) => {
                    debug!(session_id = %stale.id, "ignoring ended session in tab storage");
                }
                Err(error) => {
                    warn!(%error, "recovered session data corrupt, starting fresh");
                }
            }
        }

        let ctx = context::inspect(env);
        let session = Session {
            id: Uuid::new_v4(),
            user_id: self.user_id(),
            started_at: clock.now(),
            ended_at: None,
            duration_ms: None,
            page_views: Vec::new(),
            interactions: Vec::new(),
            form_submissions: Vec::new(),
            device: ctx.device,
            geo: None,
            referrer: ctx.referrer,
            campaign: ctx.campaign,
            traffic_source: ctx.traffic_source,
            is_bot: ctx.is_bot,
        };
        info!(session_id = %session.id, user_id = %session.user_id, "session started");
        session
    }

    /// The stable user identifier — created once, reused across sessions.
    fn user_id(&self) -> String {
        if let Some(id) = self.durable.get(USER_ID_KEY) {
            return id;
        }
        let id = Uuid::new_v4().to_string();
        if let Err(error) = self.durable.set(USER_ID_KEY, &id) {
            warn!(%error, "failed to persist user identifier");
        }
        id
    }

    /// Serialize the live session into ephemeral storage. Failures are
    /// logged and swallowed.
    pub fn persist(&self, session: &Session) {
        match serde_json::to_string(session) {
            Ok(raw) => {
                if let Err(error) = self.ephemeral.set(SESSION_KEY, &raw) {
                    warn!(%error, "failed to persist session");
                }
            }
            Err(error) => warn!(%error, "failed to serialize session"),
        }
    }

    /// End the session: finalize the last page view, set end time and
    /// duration, submit the full record, and clear the tab key. Idempotent
    /// — only the first call has any effect. Returns whether this call
    /// ended the session.
    pub fn end(
        &self,
        session: &mut Session,
        now: DateTime<Utc>,
        bounce_threshold_ms: u64,
        transport: &dyn TransportSink,
    ) -> bool {
        if session.ended_at.is_some() {
            debug!(session_id = %session.id, "session already ended, ignoring");
            return false;
        }

        finalize_last_page_view(session, now, bounce_threshold_ms);

        session.ended_at = Some(now);
        session.duration_ms =
            Some((now - session.started_at).num_milliseconds().max(0) as u64);

        transport.submit_session(session);
        // The tab key only exists for reload recovery of a live session
        self.ephemeral.remove(SESSION_KEY);
        info!(
            session_id = %session.id,
            duration_ms = session.duration_ms,
            page_views = session.page_views.len(),
            interactions = session.interactions.len(),
            "session ended"
        );
        true
    }
}

/// Finalize an open page view on navigation away. Duration is set once; the
/// bounce flag is only evaluated at session end.
pub fn close_page_view(session: &mut Session, now: DateTime<Utc>) {
    if let Some(pv) = session.page_views.last_mut() {
        if pv.duration_ms.is_none() {
            pv.duration_ms = Some((now - pv.entered_at).num_milliseconds().max(0) as u64);
        }
    }
}

/// Finalize the last page view at session end: mark it the exit page and
/// evaluate the bounce rule — a sole page view under the threshold.
fn finalize_last_page_view(session: &mut Session, now: DateTime<Utc>, bounce_threshold_ms: u64) {
    let sole_view = session.page_views.len() == 1;
    if let Some(pv) = session.page_views.last_mut() {
        if pv.duration_ms.is_none() {
            pv.duration_ms = Some((now - pv.entered_at).num_milliseconds().max(0) as u64);
        }
        pv.exit_page = true;
        if sole_view && pv.duration_ms.unwrap_or(0) < bounce_threshold_ms {
            pv.bounced = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pulse_core::ports::{manual_clock, MemoryStore, RejectingStore, StaticEnvironment};
    use pulse_core::sink::{capture_transport, noop_transport};
    use pulse_core::types::PageView;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn store() -> SessionStore {
        SessionStore::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_creates_fresh_session_with_stable_user_id() {
        let durable = Arc::new(MemoryStore::new());
        let store = SessionStore::new(durable.clone(), Arc::new(MemoryStore::new()));
        let clock = manual_clock(t0());
        let env = StaticEnvironment::default();

        let first = store.get_or_create(clock.as_ref(), &env);
        let second = store.get_or_create(clock.as_ref(), &env);

        // Different sessions, same durable user identifier
        assert_ne!(first.id, second.id);
        assert_eq!(first.user_id, second.user_id);
        assert_eq!(
            DurableStore::get(durable.as_ref(), USER_ID_KEY).as_deref(),
            Some(first.user_id.as_str())
        );
    }

    #[test]
    fn test_recovers_persisted_session() {
        let ephemeral = Arc::new(MemoryStore::new());
        let store = SessionStore::new(Arc::new(MemoryStore::new()), ephemeral.clone());
        let clock = manual_clock(t0());
        let env = StaticEnvironment::default();

        let session = store.get_or_create(clock.as_ref(), &env);
        store.persist(&session);

        let recovered = store.get_or_create(clock.as_ref(), &env);
        assert_eq!(recovered.id, session.id);
        assert_eq!(recovered.user_id, session.user_id);
    }

    #[test]
    fn test_corrupt_recovery_falls_back_to_fresh_session() {
        let ephemeral = Arc::new(MemoryStore::new());
        EphemeralStore::set(ephemeral.as_ref(), SESSION_KEY, "{not json").unwrap();
        let store = SessionStore::new(Arc::new(MemoryStore::new()), ephemeral);
        let clock = manual_clock(t0());

        let session = store.get_or_create(clock.as_ref(), &StaticEnvironment::default());
        assert!(session.ended_at.is_none());
        assert!(session.page_views.is_empty());
    }

    #[test]
    fn test_storage_write_failure_is_swallowed() {
        let store = SessionStore::new(Arc::new(RejectingStore), Arc::new(RejectingStore));
        let clock = manual_clock(t0());

        // Neither user-id nor session persistence may propagate failures
        let session = store.get_or_create(clock.as_ref(), &StaticEnvironment::default());
        store.persist(&session);
    }

    #[test]
    fn test_end_is_idempotent_and_submits_once() {
        let store = store();
        let clock = manual_clock(t0());
        let transport = capture_transport();
        let mut session = store.get_or_create(clock.as_ref(), &StaticEnvironment::default());
        session.page_views.push(PageView::new("https://example.com/", "Home", t0()));

        clock.advance_ms(10_000);
        assert!(store.end(&mut session, clock.now(), 30_000, transport.as_ref()));
        assert!(!store.end(&mut session, clock.now(), 30_000, transport.as_ref()));

        assert_eq!(transport.session_count(), 1);
        assert_eq!(session.duration_ms, Some(10_000));
        assert_eq!(session.ended_at, Some(clock.now()));
    }

    #[test]
    fn test_end_clears_tab_storage() {
        let ephemeral = Arc::new(MemoryStore::new());
        let store = SessionStore::new(Arc::new(MemoryStore::new()), ephemeral.clone());
        let clock = manual_clock(t0());
        let mut session = store.get_or_create(clock.as_ref(), &StaticEnvironment::default());
        store.persist(&session);

        store.end(&mut session, clock.now(), 30_000, noop_transport().as_ref());

        // A later load starts a fresh session instead of reviving the ended one
        assert!(EphemeralStore::get(ephemeral.as_ref(), SESSION_KEY).is_none());
        let next = store.get_or_create(clock.as_ref(), &StaticEnvironment::default());
        assert_ne!(next.id, session.id);
        assert!(next.ended_at.is_none());
    }

    #[test]
    fn test_sole_short_page_view_bounces() {
        let store = store();
        let clock = manual_clock(t0());
        let mut session = store.get_or_create(clock.as_ref(), &StaticEnvironment::default());
        session.page_views.push(PageView::new("https://example.com/", "Home", t0()));

        clock.advance_ms(10_000);
        store.end(&mut session, clock.now(), 30_000, noop_transport().as_ref());

        let pv = &session.page_views[0];
        assert!(pv.bounced);
        assert!(pv.exit_page);
        assert_eq!(pv.duration_ms, Some(10_000));
    }

    #[test]
    fn test_multi_page_session_never_bounces() {
        let store = store();
        let clock = manual_clock(t0());
        let mut session = store.get_or_create(clock.as_ref(), &StaticEnvironment::default());
        session.page_views.push(PageView::new("https://example.com/", "Home", t0()));

        clock.advance_ms(5_000);
        close_page_view(&mut session, clock.now());
        session
            .page_views
            .push(PageView::new("https://example.com/pricing", "Pricing", clock.now()));

        clock.advance_ms(2_000);
        store.end(&mut session, clock.now(), 30_000, noop_transport().as_ref());

        assert!(!session.page_views[0].bounced);
        assert!(!session.page_views[1].bounced);
        assert!(session.page_views[1].exit_page);
    }

    #[test]
    fn test_long_sole_page_view_does_not_bounce() {
        let store = store();
        let clock = manual_clock(t0());
        let mut session = store.get_or_create(clock.as_ref(), &StaticEnvironment::default());
        session.page_views.push(PageView::new("https://example.com/", "Home", t0()));

        clock.advance_ms(45_000);
        store.end(&mut session, clock.now(), 30_000, noop_transport().as_ref());

        assert!(!session.page_views[0].bounced);
    }
}
