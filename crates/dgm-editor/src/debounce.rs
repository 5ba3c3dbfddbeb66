//! Deadline bookkeeping for debounced persistence.
//!
//! The scheduler never sleeps or spawns: callers pass `now` in and ask which
//! entries are due, so the same code runs under a real clock and in tests.

use dgm_core::id::{ConnectorId, ShapeId};
use std::time::Duration;
use tokio::time::Instant;

/// An entity waiting to be persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingKey {
    Shape(ShapeId),
    Connector(ConnectorId),
}

#[derive(Debug, Clone)]
pub struct DebounceScheduler {
    delay: Duration,
    /// Scheduling order is kept so due entries flush first-edited first.
    pending: Vec<(PendingKey, Instant)>,
}

impl DebounceScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Vec::new(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `key` for `now + delay`. Rescheduling an entry pushes its
    /// deadline back instead of adding a second one.
    pub fn schedule(&mut self, key: PendingKey, now: Instant) -> Instant {
        let deadline = now + self.delay;
        match self.pending.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = deadline,
            None => self.pending.push((key, deadline)),
        }
        deadline
    }

    /// Remove and return every entry whose deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> Vec<PendingKey> {
        let mut due = Vec::new();
        self.pending.retain(|(key, deadline)| {
            if *deadline <= now {
                due.push(*key);
                false
            } else {
                true
            }
        });
        due
    }

    pub fn take_all(&mut self) -> Vec<PendingKey> {
        self.pending.drain(..).map(|(key, _)| key).collect()
    }

    /// Drop one pending entry. Returns whether it was scheduled.
    pub fn cancel(&mut self, key: PendingKey) -> bool {
        let before = self.pending.len();
        self.pending.retain(|(k, _)| *k != key);
        self.pending.len() != before
    }

    /// Drop everything; returns how many entries were pending.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().map(|(_, deadline)| *deadline).min()
    }

    pub fn is_pending(&self, key: PendingKey) -> bool {
        self.pending.iter().any(|(k, _)| *k == key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(300);

    fn shape(id: &str) -> PendingKey {
        PendingKey::Shape(ShapeId::intern(id))
    }

    #[test]
    fn repeated_edits_coalesce_and_push_deadline_back() {
        let mut scheduler = DebounceScheduler::new(DELAY);
        let t0 = Instant::now();
        scheduler.schedule(shape("a"), t0);
        let later = scheduler.schedule(shape("a"), t0 + Duration::from_millis(200));
        assert_eq!(scheduler.len(), 1);
        assert_eq!(later, t0 + Duration::from_millis(500));

        assert!(scheduler.take_due(t0 + DELAY).is_empty());
        assert_eq!(scheduler.take_due(later), vec![shape("a")]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn due_entries_come_out_in_scheduling_order() {
        let mut scheduler = DebounceScheduler::new(DELAY);
        let t0 = Instant::now();
        scheduler.schedule(shape("b"), t0);
        scheduler.schedule(PendingKey::Connector(ConnectorId::intern("c")), t0);
        scheduler.schedule(shape("a"), t0 + Duration::from_millis(10));
        assert_eq!(scheduler.next_deadline(), Some(t0 + DELAY));

        let due = scheduler.take_due(t0 + Duration::from_secs(1));
        assert_eq!(
            due,
            vec![
                shape("b"),
                PendingKey::Connector(ConnectorId::intern("c")),
                shape("a")
            ]
        );
    }

    #[test]
    fn cancel_drops_entries() {
        let mut scheduler = DebounceScheduler::new(DELAY);
        let t0 = Instant::now();
        scheduler.schedule(shape("a"), t0);
        scheduler.schedule(shape("b"), t0);
        assert!(scheduler.cancel(shape("a")));
        assert!(!scheduler.cancel(shape("a")));
        assert!(scheduler.is_pending(shape("b")));
        assert_eq!(scheduler.cancel_all(), 1);
        assert_eq!(scheduler.next_deadline(), None);
    }
}
