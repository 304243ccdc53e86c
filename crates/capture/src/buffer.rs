//! Delivery buffer — FIFO queue of interaction records, flushed on a fixed
//! timer and synchronously in full on page exit.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use pulse_core::sink::TransportSink;
use pulse_core::types::{Interaction, InteractionKind};

/// Per-kind running counters over everything that passed through the buffer.
#[derive(Debug, Clone, Default)]
pub struct InteractionCounters {
    pub clicks: u64,
    pub hovers: u64,
    pub scrolls: u64,
    pub rage_clicks: u64,
    pub dead_clicks: u64,
    pub form_fields: u64,
    pub total: u64,
}

impl InteractionCounters {
    fn record(&mut self, kind: InteractionKind) {
        self.total += 1;
        match kind {
            InteractionKind::Click => self.clicks += 1,
            InteractionKind::Hover => self.hovers += 1,
            InteractionKind::Scroll => self.scrolls += 1,
            InteractionKind::RageClick => self.rage_clicks += 1,
            InteractionKind::DeadClick => self.dead_clicks += 1,
            InteractionKind::FormField => self.form_fields += 1,
        }
    }

    fn reclassify(&mut self, from: InteractionKind, to: InteractionKind) {
        match from {
            InteractionKind::Click => self.clicks = self.clicks.saturating_sub(1),
            InteractionKind::Hover => self.hovers = self.hovers.saturating_sub(1),
            InteractionKind::Scroll => self.scrolls = self.scrolls.saturating_sub(1),
            InteractionKind::RageClick => self.rage_clicks = self.rage_clicks.saturating_sub(1),
            InteractionKind::DeadClick => self.dead_clicks = self.dead_clicks.saturating_sub(1),
            InteractionKind::FormField => self.form_fields = self.form_fields.saturating_sub(1),
        }
        self.total = self.total.saturating_sub(1);
        self.record(to);
    }
}

/// Accumulates classified interactions and hands them to the transport sink
/// in FIFO order. Single-writer/single-reader on the page's event loop.
pub struct DeliveryBuffer {
    queue: VecDeque<Interaction>,
    transport: Arc<dyn TransportSink>,
    counters: InteractionCounters,
}

impl DeliveryBuffer {
    pub fn new(transport: Arc<dyn TransportSink>) -> Self {
        Self {
            queue: VecDeque::new(),
            transport,
            counters: InteractionCounters::default(),
        }
    }

    pub fn push(&mut self, interaction: Interaction) {
        self.counters.record(interaction.kind);
        debug!(
            interaction_id = %interaction.id,
            kind = ?interaction.kind,
            "interaction buffered"
        );
        self.queue.push_back(interaction);
    }

    /// Upgrade a still-buffered record's kind. Returns whether the record
    /// was found; an already-flushed record can no longer be touched.
    pub fn reclassify(&mut self, id: Uuid, kind: InteractionKind) -> bool {
        if let Some(entry) = self.queue.iter_mut().find(|i| i.id == id) {
            self.counters.reclassify(entry.kind, kind);
            entry.kind = kind;
            true
        } else {
            false
        }
    }

    /// Dispatch every buffered interaction, in order, to the transport sink.
    /// The queue is cleared only after the dispatch is initiated.
    pub fn flush(&mut self, session_id: Uuid, user_id: &str) {
        if self.queue.is_empty() {
            return;
        }
        let batch: Vec<Interaction> = self.queue.iter().cloned().collect();
        self.transport.submit_batch(session_id, user_id, &batch);
        self.queue.clear();
        info!(session_id = %session_id, count = batch.len(), "delivery buffer flushed");
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn counters(&self) -> &InteractionCounters {
        &self.counters
    }
}
