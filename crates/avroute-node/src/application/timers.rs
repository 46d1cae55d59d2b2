//! Deadline scheduler for the cost distribution protocol.
//!
//! Every protocol timer (per-row route timeout, per-row deletion, the regular
//! broadcast and the triggered-update cooldown) is one `(TimerKey, deadline)`
//! entry in a single [`TimerScheduler`].  Nothing here sleeps: the owner asks
//! for [`TimerScheduler::expired`] entries with an explicit `now`, which keeps
//! the protocol deterministic under test.

use std::collections::HashMap;
use std::time::Instant;

use super::cost_table::TableKind;

/// Identifies one pending timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKey {
    /// The route held by a cost-table row expires unless refreshed.
    RouteTimeout { table: TableKind, id: u32 },
    /// An unreachable row is removed when this fires.
    Deletion { table: TableKind, id: u32 },
    /// Next full cost broadcast.
    RegularUpdate,
    /// End of the quiet period after a triggered update.
    TriggeredCooldown,
}

/// A set of named deadlines; scheduling a key again replaces its deadline.
#[derive(Debug, Default)]
pub struct TimerScheduler {
    deadlines: HashMap<TimerKey, Instant>,
}

impl TimerScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `key` to fire at `deadline`, replacing any earlier deadline.
    pub fn schedule(&mut self, key: TimerKey, deadline: Instant) {
        self.deadlines.insert(key, deadline);
    }

    /// Disarms `key`; returns `true` if it was armed.
    pub fn cancel(&mut self, key: TimerKey) -> bool {
        self.deadlines.remove(&key).is_some()
    }

    pub fn is_scheduled(&self, key: TimerKey) -> bool {
        self.deadlines.contains_key(&key)
    }

    pub fn deadline(&self, key: TimerKey) -> Option<Instant> {
        self.deadlines.get(&key).copied()
    }

    /// Removes and returns every key whose deadline is at or before `now`,
    /// earliest first.
    pub fn expired(&mut self, now: Instant) -> Vec<TimerKey> {
        let mut due: Vec<(Instant, TimerKey)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, deadline)| (*deadline, *key))
            .collect();
        due.sort();
        for (_, key) in &due {
            self.deadlines.remove(key);
        }
        due.into_iter().map(|(_, key)| key).collect()
    }

    /// Earliest armed deadline, used by the runtime to decide how long to sleep.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn timeout(id: u32) -> TimerKey {
        TimerKey::RouteTimeout {
            table: TableKind::Sources,
            id,
        }
    }

    #[test]
    fn test_expired_returns_due_keys_in_deadline_order() {
        // Arrange
        let start = Instant::now();
        let mut timers = TimerScheduler::new();
        timers.schedule(timeout(2), start + Duration::from_secs(20));
        timers.schedule(timeout(1), start + Duration::from_secs(10));
        timers.schedule(TimerKey::RegularUpdate, start + Duration::from_secs(60));

        // Act
        let due = timers.expired(start + Duration::from_secs(30));

        // Assert
        assert_eq!(due, vec![timeout(1), timeout(2)]);
        assert_eq!(timers.len(), 1);
        assert!(timers.is_scheduled(TimerKey::RegularUpdate));
    }

    #[test]
    fn test_schedule_replaces_existing_deadline() {
        let start = Instant::now();
        let mut timers = TimerScheduler::new();
        timers.schedule(timeout(1), start + Duration::from_secs(10));

        timers.schedule(timeout(1), start + Duration::from_secs(50));

        assert!(timers.expired(start + Duration::from_secs(20)).is_empty());
        assert_eq!(
            timers.deadline(timeout(1)),
            Some(start + Duration::from_secs(50))
        );
    }

    #[test]
    fn test_cancel_disarms_key() {
        let start = Instant::now();
        let mut timers = TimerScheduler::new();
        timers.schedule(TimerKey::TriggeredCooldown, start);

        assert!(timers.cancel(TimerKey::TriggeredCooldown));
        assert!(!timers.cancel(TimerKey::TriggeredCooldown));
        assert!(timers.expired(start + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn test_next_deadline_is_earliest() {
        let start = Instant::now();
        let mut timers = TimerScheduler::new();
        assert_eq!(timers.next_deadline(), None);

        timers.schedule(timeout(1), start + Duration::from_secs(5));
        timers.schedule(
            TimerKey::Deletion {
                table: TableKind::Destinations,
                id: 1,
            },
            start + Duration::from_secs(3),
        );

        assert_eq!(timers.next_deadline(), Some(start + Duration::from_secs(3)));
    }
}
