//! Deterministic timer queue — the engine's only source of delayed work.
//!
//! Timers are plain data ordered by deadline; the host pumps due entries by
//! calling into the engine after its clock moves. Equal deadlines fire in
//! scheduling order.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Identifies a pending timer. Debounce kinds are singletons — scheduling
/// one replaces any pending entry of the same kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Periodic delivery-buffer flush.
    FlushTick,
    /// Hover quiet-time debounce.
    HoverDebounce,
    /// Scroll quiet-time debounce.
    ScrollDebounce,
    /// Delayed dead-click recheck for one click record.
    DeadClickCheck { interaction_id: Uuid },
}

#[derive(Debug, Clone)]
struct TimerEntry {
    fire_at: DateTime<Utc>,
    seq: u64,
    kind: TimerKind,
}

/// Pending timers for one engine instance.
#[derive(Default)]
pub struct TimerQueue {
    entries: Vec<TimerEntry>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `kind` to fire `delay_ms` after `now`. An already-pending
    /// entry of the same kind is replaced.
    pub fn schedule(&mut self, kind: TimerKind, now: DateTime<Utc>, delay_ms: u64) {
        self.cancel(&kind);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(TimerEntry {
            fire_at: now + Duration::milliseconds(delay_ms as i64),
            seq,
            kind,
        });
    }

    /// Remove any pending entry of the given kind.
    pub fn cancel(&mut self, kind: &TimerKind) {
        self.entries.retain(|e| &e.kind != kind);
    }

    /// Drop every pending timer. The page-unload path.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Pop the earliest entry due at or before `now`, ties broken by
    /// scheduling order.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<TimerKind> {
        let idx = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.fire_at <= now)
            .min_by_key(|(_, e)| (e.fire_at, e.seq))
            .map(|(i, _)| i)?;
        Some(self.entries.swap_remove(idx).kind)
    }

    pub fn is_scheduled(&self, kind: &TimerKind) -> bool {
        self.entries.iter().any(|e| &e.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_fires_in_deadline_order() {
        let mut queue = TimerQueue::new();
        queue.schedule(TimerKind::FlushTick, t0(), 5000);
        queue.schedule(TimerKind::HoverDebounce, t0(), 500);
        queue.schedule(TimerKind::ScrollDebounce, t0(), 150);

        let later = t0() + Duration::milliseconds(5000);
        assert_eq!(queue.pop_due(later), Some(TimerKind::ScrollDebounce));
        assert_eq!(queue.pop_due(later), Some(TimerKind::HoverDebounce));
        assert_eq!(queue.pop_due(later), Some(TimerKind::FlushTick));
        assert_eq!(queue.pop_due(later), None);
    }

    #[test]
    fn test_nothing_due_before_deadline() {
        let mut queue = TimerQueue::new();
        queue.schedule(TimerKind::HoverDebounce, t0(), 500);

        assert_eq!(queue.pop_due(t0() + Duration::milliseconds(499)), None);
        assert_eq!(
            queue.pop_due(t0() + Duration::milliseconds(500)),
            Some(TimerKind::HoverDebounce)
        );
    }

    #[test]
    fn test_reschedule_replaces_pending_entry() {
        let mut queue = TimerQueue::new();
        queue.schedule(TimerKind::ScrollDebounce, t0(), 150);
        queue.schedule(
            TimerKind::ScrollDebounce,
            t0() + Duration::milliseconds(100),
            150,
        );

        assert_eq!(queue.len(), 1);
        // Original deadline no longer fires
        assert_eq!(queue.pop_due(t0() + Duration::milliseconds(150)), None);
        assert_eq!(
            queue.pop_due(t0() + Duration::milliseconds(250)),
            Some(TimerKind::ScrollDebounce)
        );
    }

    #[test]
    fn test_equal_deadlines_fire_in_scheduling_order() {
        let mut queue = TimerQueue::new();
        let a = TimerKind::DeadClickCheck {
            interaction_id: Uuid::new_v4(),
        };
        let b = TimerKind::DeadClickCheck {
            interaction_id: Uuid::new_v4(),
        };
        queue.schedule(a.clone(), t0(), 1000);
        queue.schedule(b.clone(), t0(), 1000);

        let due = t0() + Duration::milliseconds(1000);
        assert_eq!(queue.pop_due(due), Some(a));
        assert_eq!(queue.pop_due(due), Some(b));
    }

    #[test]
    fn test_clear_cancels_everything() {
        let mut queue = TimerQueue::new();
        queue.schedule(TimerKind::FlushTick, t0(), 5000);
        queue.schedule(TimerKind::HoverDebounce, t0(), 500);
        queue.clear();

        assert!(queue.is_empty());
        assert_eq!(queue.pop_due(t0() + Duration::milliseconds(10_000)), None);
    }
}
