//! Capture engine — the single per-page context object owning the live
//! session and wiring the store, classifier, buffer, and timer queue
//! together. Hosts construct one engine per page and pass it by reference;
//! there is no ambient global state.
//!
//! Every public entry point is exception-safe from the host's perspective:
//! failures in storage or transport are logged and swallowed, and calls
//! after the session has ended are no-ops.

use std::sync::Arc;

use tracing::{debug, info};

use pulse_core::config::CaptureConfig;
use pulse_core::ports::{Clock, DurableStore, EnvironmentInfo, EphemeralStore};
use pulse_core::sink::{BridgeSink, TransportSink};
use pulse_core::types::{PageView, Point, Session, TargetDescriptor};

use crate::buffer::{DeliveryBuffer, InteractionCounters};
use crate::classifier::{InteractionClassifier, Outlets};
use crate::session::{close_page_view, SessionStore};
use crate::timers::{TimerKind, TimerQueue};

/// Live-capture engine for one page session.
pub struct CaptureEngine {
    config: CaptureConfig,
    clock: Arc<dyn Clock>,
    store: SessionStore,
    transport: Arc<dyn TransportSink>,
    classifier: InteractionClassifier,
    buffer: DeliveryBuffer,
    timers: TimerQueue,
    bridges: Vec<Arc<dyn BridgeSink>>,
    session: Session,
    current_url: String,
}

impl CaptureEngine {
    /// Construct the engine, recover or create the session, open the first
    /// page view, and arm the periodic flush.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CaptureConfig,
        clock: Arc<dyn Clock>,
        env: Arc<dyn EnvironmentInfo>,
        durable: Arc<dyn DurableStore>,
        ephemeral: Arc<dyn EphemeralStore>,
        transport: Arc<dyn TransportSink>,
        bridges: Vec<Arc<dyn BridgeSink>>,
    ) -> Self {
        let store = SessionStore::new(durable, ephemeral);
        let session = store.get_or_create(clock.as_ref(), env.as_ref());

        let bridge_names: Vec<&str> = bridges.iter().map(|b| b.name()).collect();
        info!(bridges = ?bridge_names, "instrumentation bridges attached");

        let mut engine = Self {
            classifier: InteractionClassifier::new(config.clone()),
            buffer: DeliveryBuffer::new(transport.clone()),
            transport,
            timers: TimerQueue::new(),
            bridges,
            session,
            current_url: env.page_url(),
            store,
            clock,
            config,
        };

        let now = engine.clock.now();
        let (url, title) = (env.page_url(), env.page_title());
        engine.open_page_view(url, title);
        engine
            .timers
            .schedule(TimerKind::FlushTick, now, engine.config.flush_interval_ms);
        engine.store.persist(&engine.session);
        engine
    }

    /// The live session record.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Interactions awaiting the next flush.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Running per-kind counters over everything captured so far.
    pub fn counters(&self) -> &InteractionCounters {
        self.buffer.counters()
    }

    fn ended(&self) -> bool {
        self.session.ended_at.is_some()
    }

    /// Fire every timer due at the current clock reading. Hosts call this
    /// from their own scheduling tick; tests advance a manual clock first.
    pub fn pump(&mut self) {
        if self.ended() {
            return;
        }
        let now = self.clock.now();
        while let Some(kind) = self.timers.pop_due(now) {
            match kind {
                TimerKind::FlushTick => {
                    let (session_id, user_id) = (self.session.id, self.session.user_id.clone());
                    self.buffer.flush(session_id, &user_id);
                    self.timers
                        .schedule(TimerKind::FlushTick, now, self.config.flush_interval_ms);
                }
                TimerKind::HoverDebounce => {
                    let mut outlets = Outlets {
                        session: &mut self.session,
                        buffer: &mut self.buffer,
                        timers: &mut self.timers,
                        bridges: &self.bridges,
                    };
                    self.classifier.fire_hover(now, &mut outlets);
                }
                TimerKind::ScrollDebounce => {
                    let mut outlets = Outlets {
                        session: &mut self.session,
                        buffer: &mut self.buffer,
                        timers: &mut self.timers,
                        bridges: &self.bridges,
                    };
                    self.classifier.fire_scroll(now, &mut outlets);
                }
                TimerKind::DeadClickCheck { interaction_id } => {
                    let mut outlets = Outlets {
                        session: &mut self.session,
                        buffer: &mut self.buffer,
                        timers: &mut self.timers,
                        bridges: &self.bridges,
                    };
                    self.classifier.fire_dead_click_check(
                        interaction_id,
                        &self.current_url,
                        &mut outlets,
                    );
                }
            }
        }
        self.store.persist(&self.session);
    }

    pub fn on_click(&mut self, x: f64, y: f64, target: TargetDescriptor) {
        if self.ended() {
            return;
        }
        let now = self.clock.now();
        let mut outlets = Outlets {
            session: &mut self.session,
            buffer: &mut self.buffer,
            timers: &mut self.timers,
            bridges: &self.bridges,
        };
        self.classifier
            .on_click(now, Point { x, y }, target, &self.current_url, &mut outlets);
        self.store.persist(&self.session);
    }

    pub fn on_mouse_move(&mut self, x: f64, y: f64, target: TargetDescriptor) {
        if self.ended() {
            return;
        }
        let now = self.clock.now();
        self.classifier
            .on_mouse_move(now, Point { x, y }, target, &mut self.timers);
    }

    pub fn on_scroll(&mut self, depth_percent: u8) {
        if self.ended() {
            return;
        }
        let now = self.clock.now();
        self.classifier.on_scroll(now, depth_percent, &mut self.timers);
    }

    pub fn on_pointer_leave(&mut self, y: f64) {
        if self.ended() {
            return;
        }
        let now = self.clock.now();
        let outlets = Outlets {
            session: &mut self.session,
            buffer: &mut self.buffer,
            timers: &mut self.timers,
            bridges: &self.bridges,
        };
        self.classifier.on_pointer_leave(now, y, &outlets);
    }

    /// Navigation within the session: finalize the open page view, reset
    /// per-page classifier state, and open a new view.
    pub fn on_navigation(&mut self, url: &str, title: &str) {
        if self.ended() {
            return;
        }
        let now = self.clock.now();
        close_page_view(&mut self.session, now);
        self.classifier.reset_page_state(&mut self.timers);
        self.open_page_view(url.to_string(), title.to_string());
        debug!(url = url, "page view opened");
        self.store.persist(&self.session);
    }

    pub fn track_form(&mut self, form_id: &str, form_name: Option<String>, fields: &[&str]) {
        if self.ended() {
            return;
        }
        let now = self.clock.now();
        self.classifier.track_form(now, form_id, form_name, fields);
    }

    pub fn on_field_focus(&mut self, form_id: &str, field: &str) {
        if self.ended() {
            return;
        }
        let now = self.clock.now();
        self.classifier.on_field_focus(now, form_id, field);
    }

    pub fn on_field_change(&mut self, form_id: &str, field: &str) {
        if self.ended() {
            return;
        }
        self.classifier.on_field_change(form_id, field);
    }

    pub fn on_field_blur(&mut self, form_id: &str, field: &str, value: &str) {
        if self.ended() {
            return;
        }
        let now = self.clock.now();
        let mut outlets = Outlets {
            session: &mut self.session,
            buffer: &mut self.buffer,
            timers: &mut self.timers,
            bridges: &self.bridges,
        };
        self.classifier
            .on_field_blur(now, form_id, field, value, &mut outlets);
        self.store.persist(&self.session);
    }

    pub fn on_form_error(&mut self, form_id: &str, field: &str, message: &str) {
        if self.ended() {
            return;
        }
        self.classifier.on_form_error(form_id, field, message);
    }

    pub fn on_form_submit(&mut self, form_id: &str) {
        if self.ended() {
            return;
        }
        let now = self.clock.now();
        let mut outlets = Outlets {
            session: &mut self.session,
            buffer: &mut self.buffer,
            timers: &mut self.timers,
            bridges: &self.bridges,
        };
        self.classifier.on_form_submit(now, form_id, &mut outlets);
        self.store.persist(&self.session);
    }

    /// Page unload: abandon touched forms, flush the buffer in full, end
    /// the session (idempotent), and clear every pending timer so nothing
    /// fires after teardown.
    pub fn on_unload(&mut self) {
        let now = self.clock.now();
        if !self.ended() {
            let mut outlets = Outlets {
                session: &mut self.session,
                buffer: &mut self.buffer,
                timers: &mut self.timers,
                bridges: &self.bridges,
            };
            self.classifier.finalize_abandoned_forms(now, &mut outlets);

            let (session_id, user_id) = (self.session.id, self.session.user_id.clone());
            self.buffer.flush(session_id, &user_id);

            self.store.end(
                &mut self.session,
                now,
                self.config.bounce_threshold_ms,
                self.transport.as_ref(),
            );
        }
        self.timers.clear();
    }

    fn open_page_view(&mut self, url: String, title: String) {
        let now = self.clock.now();
        self.current_url = url.clone();
        self.session.page_views.push(PageView::new(url, title, now));
    }
}
