//! Interaction classification — converts raw input events into typed
//! interaction records, applying debouncing, thresholding, and delayed
//! rechecks. Every output is pushed to both the live session and the
//! delivery buffer; classification never touches unrelated state.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use pulse_core::config::{CaptureConfig, SCROLL_MILESTONES};
use pulse_core::sink::BridgeSink;
use pulse_core::types::{
    FormError, FormField, FormSubmission, Interaction, InteractionKind, Point, Session,
    TargetDescriptor,
};

use crate::buffer::DeliveryBuffer;
use crate::timers::{TimerKind, TimerQueue};

/// Mutable view over everything a classification step may write to.
pub struct Outlets<'a> {
    pub session: &'a mut Session,
    pub buffer: &'a mut DeliveryBuffer,
    pub timers: &'a mut TimerQueue,
    pub bridges: &'a [Arc<dyn BridgeSink>],
}

impl Outlets<'_> {
    /// Push one record into both the live session and the delivery buffer.
    fn emit(&mut self, interaction: Interaction) {
        self.session.interactions.push(interaction.clone());
        self.buffer.push(interaction);
    }

    fn bridge_event(&self, event: &str, params: BTreeMap<String, String>) {
        for bridge in self.bridges {
            bridge.record_event(event, &params);
        }
    }
}

fn params<const N: usize>(pairs: [(&str, String); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct ClickSample {
    at: DateTime<Utc>,
    point: Point,
}

#[derive(Debug, Clone)]
struct PendingHover {
    point: Point,
    target: TargetDescriptor,
}

struct FormState {
    submission: FormSubmission,
    touched: bool,
    submitted: bool,
}

/// State machine over the raw input streams of one page session.
pub struct InteractionClassifier {
    config: CaptureConfig,
    last_click: Option<ClickSample>,
    rage_run: u32,
    pending_hover: Option<PendingHover>,
    pending_scroll: Option<u8>,
    fired_milestones: Vec<u8>,
    /// Click id → page URL at click time, awaiting the delayed recheck.
    pending_dead_clicks: HashMap<Uuid, String>,
    forms: HashMap<String, FormState>,
}

impl InteractionClassifier {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            last_click: None,
            rage_run: 0,
            pending_hover: None,
            pending_scroll: None,
            fired_milestones: Vec::new(),
            pending_dead_clicks: HashMap::new(),
            forms: HashMap::new(),
        }
    }

    /// Record a click immediately and schedule its dead-click recheck. Also
    /// advances the rage-run counter and emits a rage click when the run
    /// reaches the threshold.
    pub fn on_click(
        &mut self,
        now: DateTime<Utc>,
        point: Point,
        target: TargetDescriptor,
        current_url: &str,
        outlets: &mut Outlets<'_>,
    ) {
        let click = Interaction::new(
            InteractionKind::Click,
            target.clone(),
            now,
            Some(point),
            None,
        );
        self.pending_dead_clicks
            .insert(click.id, current_url.to_string());
        outlets.timers.schedule(
            TimerKind::DeadClickCheck {
                interaction_id: click.id,
            },
            now,
            self.config.dead_click_delay_ms,
        );
        outlets.emit(click);

        let qualifies = self.last_click.is_some_and(|prev| {
            let delta_ms = (now - prev.at).num_milliseconds();
            delta_ms >= 0
                && (delta_ms as u64) < self.config.rage_window_ms
                && (point.x - prev.point.x).abs() < self.config.rage_radius_px
                && (point.y - prev.point.y).abs() < self.config.rage_radius_px
        });
        self.rage_run = if qualifies { self.rage_run + 1 } else { 1 };

        if self.rage_run >= self.config.rage_threshold {
            debug!(run = self.rage_run, x = point.x, y = point.y, "rage click detected");
            outlets.emit(Interaction::new(
                InteractionKind::RageClick,
                target,
                now,
                Some(point),
                None,
            ));
            outlets.bridge_event(
                "rage_click",
                params([
                    ("x", point.x.to_string()),
                    ("y", point.y.to_string()),
                    ("run", self.rage_run.to_string()),
                ]),
            );
            self.rage_run = 0;
        }

        self.last_click = Some(ClickSample { at: now, point });
    }

    /// The delayed recheck: a click whose page URL never changed is upgraded
    /// to a dead click. This is a coarse proxy for "the click caused no
    /// effect" — single-page navigations that mutate state without changing
    /// the URL are counted dead, a known false-positive source.
    pub fn fire_dead_click_check(
        &mut self,
        interaction_id: Uuid,
        current_url: &str,
        outlets: &mut Outlets<'_>,
    ) {
        let Some(url_at_click) = self.pending_dead_clicks.remove(&interaction_id) else {
            return;
        };
        if url_at_click != current_url {
            return;
        }
        if let Some(record) = outlets
            .session
            .interactions
            .iter_mut()
            .find(|i| i.id == interaction_id && i.kind == InteractionKind::Click)
        {
            record.kind = InteractionKind::DeadClick;
            outlets.buffer.reclassify(interaction_id, InteractionKind::DeadClick);
            debug!(interaction_id = %interaction_id, "click upgraded to dead click");
        }
    }

    /// Track pointer movement; a hover record is emitted only after the
    /// quiet-time debounce elapses.
    pub fn on_mouse_move(
        &mut self,
        now: DateTime<Utc>,
        point: Point,
        target: TargetDescriptor,
        timers: &mut TimerQueue,
    ) {
        self.pending_hover = Some(PendingHover { point, target });
        timers.schedule(TimerKind::HoverDebounce, now, self.config.hover_debounce_ms);
    }

    /// Hover debounce elapsed: emit the last pending position.
    pub fn fire_hover(&mut self, now: DateTime<Utc>, outlets: &mut Outlets<'_>) {
        if let Some(pending) = self.pending_hover.take() {
            outlets.emit(Interaction::new(
                InteractionKind::Hover,
                pending.target,
                now,
                Some(pending.point),
                None,
            ));
        }
    }

    /// Track a scroll-depth measurement; applied after the quiet-time
    /// debounce elapses.
    pub fn on_scroll(&mut self, now: DateTime<Utc>, depth_percent: u8, timers: &mut TimerQueue) {
        let depth = depth_percent.min(100);
        self.pending_scroll = Some(self.pending_scroll.map_or(depth, |d| d.max(depth)));
        timers.schedule(TimerKind::ScrollDebounce, now, self.config.scroll_debounce_ms);
    }

    /// Scroll debounce elapsed: raise the active page view's depth to the
    /// running maximum, record a scroll interaction, and fire at most one
    /// milestone — the highest one the measured depth has reached, once per
    /// page view.
    pub fn fire_scroll(&mut self, now: DateTime<Utc>, outlets: &mut Outlets<'_>) {
        let Some(depth) = self.pending_scroll.take() else {
            return;
        };

        let url = match outlets.session.page_views.last_mut() {
            Some(pv) => {
                if depth > pv.scroll_depth_percent {
                    pv.scroll_depth_percent = depth;
                }
                pv.url.clone()
            }
            None => return,
        };

        outlets.emit(Interaction::new(
            InteractionKind::Scroll,
            TargetDescriptor::tag("document"),
            now,
            None,
            Some(depth.to_string()),
        ));

        if let Some(&milestone) = SCROLL_MILESTONES.iter().rev().find(|&&m| m <= depth) {
            if !self.fired_milestones.contains(&milestone) {
                self.fired_milestones.push(milestone);
                outlets.bridge_event(
                    "scroll_milestone",
                    params([
                        ("milestone", milestone.to_string()),
                        ("depth", depth.to_string()),
                        ("url", url),
                    ]),
                );
            }
        }
    }

    /// Pointer left the viewport at the top edge: one-shot exit-intent
    /// signal carrying time-on-page so far.
    pub fn on_pointer_leave(&self, now: DateTime<Utc>, y: f64, outlets: &Outlets<'_>) {
        if y > 0.0 {
            return;
        }
        let (time_on_page_ms, url) = match outlets.session.page_views.last() {
            Some(pv) => (
                (now - pv.entered_at).num_milliseconds().max(0) as u64,
                pv.url.clone(),
            ),
            None => (
                (now - outlets.session.started_at).num_milliseconds().max(0) as u64,
                String::new(),
            ),
        };
        outlets.bridge_event(
            "exit_intent",
            params([
                ("time_on_page_ms", time_on_page_ms.to_string()),
                ("url", url),
            ]),
        );
    }

    /// Reset per-page state on navigation. Pending dead-click rechecks stay
    /// — they carry the URL observed at click time.
    pub fn reset_page_state(&mut self, timers: &mut TimerQueue) {
        self.fired_milestones.clear();
        self.pending_hover = None;
        self.pending_scroll = None;
        timers.cancel(&TimerKind::HoverDebounce);
        timers.cancel(&TimerKind::ScrollDebounce);
    }

    /// Begin tracking a form and its fields.
    pub fn track_form(
        &mut self,
        now: DateTime<Utc>,
        form_id: &str,
        form_name: Option<String>,
        field_names: &[&str],
    ) {
        let submission = FormSubmission {
            form_id: form_id.to_string(),
            form_name,
            started_at: now,
            duration_ms: None,
            fields: field_names.iter().copied().map(FormField::new).collect(),
            abandoned: false,
            errors: Vec::new(),
        };
        self.forms.insert(
            form_id.to_string(),
            FormState {
                submission,
                touched: false,
                submitted: false,
            },
        );
    }

    /// First focus stamps the field's time-to-first-focus.
    pub fn on_field_focus(&mut self, now: DateTime<Utc>, form_id: &str, field: &str) {
        let Some(state) = self.forms.get_mut(form_id) else {
            return;
        };
        state.touched = true;
        let started_at = state.submission.started_at;
        if let Some(f) = state.submission.fields.iter_mut().find(|f| f.name == field) {
            if f.time_to_first_focus_ms.is_none() {
                f.time_to_first_focus_ms =
                    Some((now - started_at).num_milliseconds().max(0) as u64);
            }
        }
    }

    /// Every value-changing event bumps the field's correction counter.
    pub fn on_field_change(&mut self, form_id: &str, field: &str) {
        let Some(state) = self.forms.get_mut(form_id) else {
            return;
        };
        state.touched = true;
        if let Some(f) = state.submission.fields.iter_mut().find(|f| f.name == field) {
            f.corrections += 1;
        }
    }

    /// Blur finalizes the field's last value and records it as a form-field
    /// interaction.
    pub fn on_field_blur(
        &mut self,
        now: DateTime<Utc>,
        form_id: &str,
        field: &str,
        value: &str,
        outlets: &mut Outlets<'_>,
    ) {
        let Some(state) = self.forms.get_mut(form_id) else {
            return;
        };
        if let Some(f) = state.submission.fields.iter_mut().find(|f| f.name == field) {
            f.last_value = Some(value.to_string());
        }
        outlets.emit(Interaction::new(
            InteractionKind::FormField,
            TargetDescriptor {
                tag: "input".into(),
                id: Some(field.to_string()),
                classes: Vec::new(),
                text: None,
            },
            now,
            None,
            Some(value.to_string()),
        ));
    }

    /// Attach a validation error reported by the host.
    pub fn on_form_error(&mut self, form_id: &str, field: &str, message: &str) {
        if let Some(state) = self.forms.get_mut(form_id) {
            state.submission.errors.push(FormError {
                field: field.to_string(),
                message: message.to_string(),
            });
        }
    }

    /// Submit finalizes duration, marks not-abandoned, and files the
    /// submission into the session.
    pub fn on_form_submit(&mut self, now: DateTime<Utc>, form_id: &str, outlets: &mut Outlets<'_>) {
        let Some(state) = self.forms.get_mut(form_id) else {
            return;
        };
        if state.submitted {
            return;
        }
        state.submitted = true;
        state.submission.duration_ms =
            Some((now - state.submission.started_at).num_milliseconds().max(0) as u64);
        state.submission.abandoned = false;
        outlets.session.form_submissions.push(state.submission.clone());
        outlets.bridge_event(
            "form_submit",
            params([
                ("form_id", form_id.to_string()),
                (
                    "duration_ms",
                    state.submission.duration_ms.unwrap_or(0).to_string(),
                ),
                ("fields", state.submission.fields.len().to_string()),
            ]),
        );
    }

    /// Page unload: every touched, unsubmitted form is filed as abandoned.
    pub fn finalize_abandoned_forms(&mut self, now: DateTime<Utc>, outlets: &mut Outlets<'_>) {
        for (form_id, state) in self.forms.iter_mut() {
            if state.submitted || !state.touched {
                continue;
            }
            state.submission.duration_ms =
                Some((now - state.submission.started_at).num_milliseconds().max(0) as u64);
            state.submission.abandoned = true;
            outlets.session.form_submissions.push(state.submission.clone());
            outlets.bridge_event(
                "form_abandon",
                params([
                    ("form_id", form_id.clone()),
                    (
                        "duration_ms",
                        state.submission.duration_ms.unwrap_or(0).to_string(),
                    ),
                ]),
            );
        }
    }
}
