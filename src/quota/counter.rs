//! Counter entry tracked per client key.

use std::time::Duration;

/// Request count for one key within its current window.
///
/// Entries are owned by [`CounterStore`](super::CounterStore); callers only
/// ever see copies returned from store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterEntry {
    /// Namespaced client key this entry belongs to
    pub key: String,
    /// Requests observed in the current window
    pub count: u64,
    /// When the current window began (epoch millis)
    pub window_start: u64,
    /// When the current window ends (epoch millis)
    pub reset_at: u64,
    /// When this entry's lineage was created (epoch millis)
    pub first_seen_at: u64,
}

impl CounterEntry {
    /// Open a fresh window for `key` starting at `now`.
    pub fn new(key: &str, window: Duration, now: u64) -> Self {
        Self {
            key: key.to_string(),
            count: 1,
            window_start: now,
            reset_at: now.saturating_add(window_millis(window)),
            first_seen_at: now,
        }
    }

    /// The window is over once `now` is strictly past `reset_at`.
    ///
    /// A request landing exactly on `reset_at` still counts against the
    /// old window.
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.reset_at
    }

    /// Milliseconds since this entry's lineage began.
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.first_seen_at)
    }

    /// Milliseconds until the window resets, zero once it has.
    pub fn millis_until_reset(&self, now: u64) -> u64 {
        self.reset_at.saturating_sub(now)
    }
}

/// Window length in milliseconds, never less than one.
pub(crate) fn window_millis(window: Duration) -> u64 {
    u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entry_opens_window() {
        let entry = CounterEntry::new("general:10.0.0.1", Duration::from_secs(60), 1_000);

        assert_eq!(entry.count, 1);
        assert_eq!(entry.window_start, 1_000);
        assert_eq!(entry.reset_at, 61_000);
        assert_eq!(entry.first_seen_at, 1_000);
        assert!(entry.reset_at > entry.window_start);
    }

    #[test]
    fn test_expiry_is_strict() {
        let entry = CounterEntry::new("k", Duration::from_millis(100), 0);

        assert!(!entry.is_expired(99));
        assert!(!entry.is_expired(100));
        assert!(entry.is_expired(101));
    }

    #[test]
    fn test_millis_until_reset_saturates() {
        let entry = CounterEntry::new("k", Duration::from_millis(100), 0);

        assert_eq!(entry.millis_until_reset(40), 60);
        assert_eq!(entry.millis_until_reset(500), 0);
        assert_eq!(entry.age(250), 250);
    }

    #[test]
    fn test_sub_millisecond_window_rounds_up() {
        assert_eq!(window_millis(Duration::from_micros(10)), 1);
    }
}
