//! Expiring, capacity-bounded counter storage.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, trace, warn};

use super::clock::Clock;
use super::counter::CounterEntry;
use crate::error::{Result, TollgateError};

/// Default upper bound on tracked keys.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;
/// Default hard ceiling on an entry's lifetime.
pub const DEFAULT_MAX_ENTRY_AGE: Duration = Duration::from_secs(2 * 60 * 60);

/// Share of entries dropped by one aggressive eviction pass, as a divisor.
const EVICTION_DIVISOR: usize = 4;

/// Capacity and lifetime limits for a [`CounterStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    /// Maximum number of live entries
    pub max_entries: usize,
    /// Entries older than this are swept even while their window is live
    pub max_entry_age: Duration,
}

impl StoreSettings {
    /// Create validated store settings.
    pub fn new(max_entries: usize, max_entry_age: Duration) -> Result<Self> {
        if max_entries == 0 {
            return Err(TollgateError::InvalidConfig(
                "max_entries must be at least 1".to_string(),
            ));
        }
        if max_entry_age.is_zero() {
            return Err(TollgateError::InvalidConfig(
                "max_entry_age must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            max_entries,
            max_entry_age,
        })
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_entry_age: DEFAULT_MAX_ENTRY_AGE,
        }
    }
}

/// Point-in-time view of store occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub entry_count: usize,
    pub max_entries: usize,
    /// At or above 80% of capacity
    pub near_capacity: bool,
}

/// Thread-safe map of client keys to request counters.
///
/// All reads and writes go through a single lock. Increments hold the
/// write guard across the whole check-and-update, so two callers racing
/// on the same key can never both open a fresh window.
pub struct CounterStore {
    entries: RwLock<HashMap<String, CounterEntry>>,
    settings: StoreSettings,
    clock: Arc<dyn Clock>,
}

impl CounterStore {
    /// Create an empty store.
    pub fn new(settings: StoreSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            settings,
            clock,
        }
    }

    /// Count one request for `key` and return the updated entry.
    ///
    /// Opens a new window when the key is unknown or its window has expired.
    /// `key` must be non-empty; deriving a usable key is the caller's job.
    pub fn increment(&self, key: &str, window: Duration) -> CounterEntry {
        self.increment_at(key, window, self.clock.now_millis())
    }

    /// Count one request for `key` as of `now` (epoch millis).
    pub fn increment_at(&self, key: &str, window: Duration, now: u64) -> CounterEntry {
        let mut entries = self.entries.write();

        if let Some(entry) = entries.get_mut(key) {
            if entry.is_expired(now) {
                *entry = CounterEntry::new(key, window, now);
                trace!(key = %key, "Counter window renewed");
            } else {
                entry.count = entry.count.saturating_add(1);
            }
            return entry.clone();
        }

        if entries.len() >= self.settings.max_entries {
            evict_oldest(&mut entries, self.settings.max_entries);
        }

        let entry = CounterEntry::new(key, window, now);
        entries.insert(key.to_string(), entry.clone());
        trace!(key = %key, "Counter created");
        entry
    }

    /// Look up an entry without touching it.
    pub fn get(&self, key: &str) -> Option<CounterEntry> {
        self.entries.read().get(key).cloned()
    }

    /// Remove expired and over-age entries as of the store clock.
    pub fn sweep(&self) -> usize {
        self.sweep_at(self.clock.now_millis())
    }

    /// Remove every entry whose window ended before `now` or whose lineage
    /// is older than the configured maximum age.
    ///
    /// Returns the number of entries removed.
    pub fn sweep_at(&self, now: u64) -> usize {
        let max_age = u64::try_from(self.settings.max_entry_age.as_millis()).unwrap_or(u64::MAX);
        let mut entries = self.entries.write();
        let before = entries.len();

        entries.retain(|_, entry| !entry.is_expired(now) && entry.age(now) <= max_age);

        let removed = before - entries.len();
        if removed > 0 {
            debug!(
                removed = removed,
                remaining = entries.len(),
                "Swept stale rate limit counters"
            );
        }
        removed
    }

    /// Drop the oldest quarter of all entries (at least one).
    ///
    /// Runs automatically when a new key arrives at capacity.
    pub fn aggressive_evict(&self) -> usize {
        let mut entries = self.entries.write();
        evict_oldest(&mut entries, self.settings.max_entries)
    }

    /// Remove a single key. Returns whether it was present.
    pub fn reset(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Current occupancy.
    pub fn stats(&self) -> StoreStats {
        let entry_count = self.entries.read().len();
        let max_entries = self.settings.max_entries;
        StoreStats {
            entry_count,
            max_entries,
            near_capacity: entry_count.saturating_mul(5) >= max_entries.saturating_mul(4),
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn settings(&self) -> StoreSettings {
        self.settings
    }

    /// Current time according to the store's clock.
    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }
}

/// Remove the oldest-lineage entries from an already locked map.
fn evict_oldest(entries: &mut HashMap<String, CounterEntry>, max_entries: usize) -> usize {
    let len = entries.len();
    if len == 0 {
        return 0;
    }
    let target = (len / EVICTION_DIVISOR).max(1).min(len);

    let mut by_age: Vec<(u64, String)> = entries
        .iter()
        .map(|(key, entry)| (entry.first_seen_at, key.clone()))
        .collect();
    by_age.sort_unstable();

    for (_, key) in by_age.into_iter().take(target) {
        entries.remove(&key);
    }

    warn!(
        evicted = target,
        remaining = entries.len(),
        max_entries = max_entries,
        "Rate limit store at capacity, evicted oldest counters"
    );
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::clock::ManualClock;

    const MINUTE: Duration = Duration::from_secs(60);

    fn test_store(max_entries: usize) -> (CounterStore, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        let settings = StoreSettings::new(max_entries, Duration::from_secs(3600)).unwrap();
        (CounterStore::new(settings, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_settings_validation() {
        assert!(StoreSettings::new(0, MINUTE).is_err());
        assert!(StoreSettings::new(10, Duration::ZERO).is_err());
        assert!(StoreSettings::new(10, MINUTE).is_ok());
    }

    #[test]
    fn test_increment_creates_entry() {
        let (store, _clock) = test_store(100);

        let entry = store.increment("general:a", MINUTE);

        assert_eq!(entry.count, 1);
        assert_eq!(entry.window_start, 1_000_000);
        assert_eq!(entry.reset_at, 1_060_000);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_increment_within_window() {
        let (store, clock) = test_store(100);

        store.increment("k", MINUTE);
        clock.advance(1_000);
        let entry = store.increment("k", MINUTE);

        assert_eq!(entry.count, 2);
        assert_eq!(entry.window_start, 1_000_000);
        assert_eq!(store.get("k"), Some(entry));
    }

    #[test]
    fn test_increment_at_exact_reset_stays_in_window() {
        let (store, clock) = test_store(100);

        store.increment("k", MINUTE);
        clock.advance(60_000);
        let entry = store.increment("k", MINUTE);

        assert_eq!(entry.count, 2);
    }

    #[test]
    fn test_increment_at_uses_supplied_time() {
        let (store, _clock) = test_store(100);

        let entry = store.increment_at("k", MINUTE, 5_000);

        assert_eq!(entry.window_start, 5_000);
        assert_eq!(entry.reset_at, 65_000);
    }

    #[test]
    fn test_increment_after_reset_opens_new_window() {
        let (store, clock) = test_store(100);

        store.increment("k", MINUTE);
        store.increment("k", MINUTE);
        clock.advance(60_001);
        let entry = store.increment("k", MINUTE);

        assert_eq!(entry.count, 1);
        assert_eq!(entry.window_start, 1_060_001);
        assert_eq!(entry.first_seen_at, 1_060_001);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_keys_are_independent() {
        let (store, _clock) = test_store(100);

        for _ in 0..3 {
            store.increment("a", MINUTE);
        }
        store.increment("b", MINUTE);

        assert_eq!(store.get("a").unwrap().count, 3);
        assert_eq!(store.get("b").unwrap().count, 1);
    }

    #[test]
    fn test_get_missing_key() {
        let (store, _clock) = test_store(100);
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_capacity_is_never_exceeded() {
        let (store, clock) = test_store(4);

        for i in 0..5 {
            store.increment(&format!("key-{}", i), MINUTE);
            clock.advance(1);
            assert!(store.len() <= 4);
        }

        // key-0 had the oldest lineage
        assert!(store.get("key-0").is_none());
        assert!(store.get("key-4").is_some());
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_existing_key_at_capacity_does_not_evict() {
        let (store, _clock) = test_store(2);

        store.increment("a", MINUTE);
        store.increment("b", MINUTE);
        store.increment("a", MINUTE);

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("a").unwrap().count, 2);
    }

    #[test]
    fn test_aggressive_evict_removes_oldest_quarter() {
        let (store, clock) = test_store(100);

        for i in 0..8 {
            store.increment(&format!("key-{}", i), MINUTE);
            clock.advance(10);
        }

        let evicted = store.aggressive_evict();

        assert_eq!(evicted, 2);
        assert_eq!(store.len(), 6);
        assert!(store.get("key-0").is_none());
        assert!(store.get("key-1").is_none());
        assert!(store.get("key-2").is_some());
    }

    #[test]
    fn test_aggressive_evict_removes_at_least_one() {
        let (store, _clock) = test_store(100);

        store.increment("only", MINUTE);
        assert_eq!(store.aggressive_evict(), 1);
        assert!(store.is_empty());
        assert_eq!(store.aggressive_evict(), 0);
    }

    #[test]
    fn test_sweep_removes_expired_windows() {
        let (store, clock) = test_store(100);

        store.increment("short", Duration::from_secs(1));
        store.increment("long", MINUTE);
        clock.advance(1_001);

        assert_eq!(store.sweep(), 1);
        assert!(store.get("short").is_none());
        assert!(store.get("long").is_some());
    }

    #[test]
    fn test_sweep_enforces_max_age_on_live_windows() {
        let clock = ManualClock::new(0);
        let settings = StoreSettings::new(100, Duration::from_secs(10)).unwrap();
        let store = CounterStore::new(settings, Arc::new(clock.clone()));

        store.increment("k", Duration::from_secs(3600));
        clock.advance(10_001);
        store.increment("k", Duration::from_secs(3600));

        // Window still open, but the entry has outlived its TTL
        assert!(!store.get("k").unwrap().is_expired(clock.now_millis()));
        assert_eq!(store.sweep_at(clock.now_millis()), 1);
        assert!(store.get("k").is_none());
    }

    #[test]
    fn test_reset_and_clear() {
        let (store, _clock) = test_store(100);

        store.increment("a", MINUTE);
        store.increment("b", MINUTE);

        assert!(store.reset("a"));
        assert!(!store.reset("a"));
        assert_eq!(store.len(), 1);

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_stats_near_capacity() {
        let (store, _clock) = test_store(10);

        for i in 0..7 {
            store.increment(&format!("k{}", i), MINUTE);
        }
        let stats = store.stats();
        assert_eq!(stats.entry_count, 7);
        assert_eq!(stats.max_entries, 10);
        assert!(!stats.near_capacity);

        store.increment("k7", MINUTE);
        assert!(store.stats().near_capacity);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let (store, _clock) = test_store(100);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..500 {
                        store.increment("shared", MINUTE);
                    }
                });
            }
        });

        assert_eq!(store.get("shared").unwrap().count, 4_000);
    }
}
