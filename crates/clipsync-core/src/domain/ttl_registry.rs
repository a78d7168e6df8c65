//! Generic address-keyed registry whose entries expire unless refreshed.
//!
//! Both master registries (peer membership and live sessions) are instances
//! of [`TtlRegistry`], parameterised by what they store per address.
//!
//! # How TTL eviction works (for beginners)
//!
//! Every entry remembers when it was last seen and how long it may stay
//! silent (its *time-to-live*).  Nothing happens at the exact moment an entry
//! goes stale; instead a background task periodically calls
//! [`TtlRegistry::sweep`], which removes every entry whose deadline has
//! passed.  Eviction is therefore *cooperative*: an expired entry lingers
//! until the next sweep.
//!
//! ```text
//! last_seen                    last_seen + ttl
//!     │◄──────────── valid ──────────►│◄──── expired (swept) ────
//! ```
//!
//! The boundary is inclusive: at exactly `last_seen + ttl` the entry is
//! already expired.
//!
//! # Locking
//!
//! One `std::sync::Mutex` guards the whole map.  Every method takes the lock,
//! does map work, and releases it before returning, so the lock is never held
//! across an `.await`.  Poisoning is ignored: the map holds no invariant that
//! a panicking caller could break halfway.
//!
//! # Clock
//!
//! Time comes from `tokio::time::Instant`.  Outside a paused runtime it is the
//! normal monotonic clock; inside `#[tokio::test(start_paused = true)]` it is
//! a simulated clock driven by `tokio::time::advance`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

/// One registry entry: the stored value plus its liveness clock.
#[derive(Debug, Clone)]
pub struct TtlEntry<V> {
    /// Caller-defined payload.
    pub value: V,
    /// How long the entry may go without a refresh.
    pub ttl: Duration,
    /// When the entry was created or last refreshed.
    pub last_seen: Instant,
}

impl<V> TtlEntry<V> {
    /// Creates an entry last seen at `now`.
    pub fn new(value: V, ttl: Duration, now: Instant) -> Self {
        Self {
            value,
            ttl,
            last_seen: now,
        }
    }

    /// The instant at which the entry becomes expired.
    pub fn deadline(&self) -> Instant {
        self.last_seen + self.ttl
    }

    /// Returns `true` when the entry is expired at `now`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.deadline()
    }
}

/// A thread-safe map from peer address to [`TtlEntry`].
#[derive(Debug)]
pub struct TtlRegistry<V> {
    entries: Mutex<HashMap<String, TtlEntry<V>>>,
}

impl<V> TtlRegistry<V> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TtlEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts `value` under `key`, last seen now.
    ///
    /// Returns the value that was replaced, if any, so the caller can
    /// invalidate it.
    pub fn insert(&self, key: &str, value: V, ttl: Duration) -> Option<V> {
        let entry = TtlEntry::new(value, ttl, Instant::now());
        self.lock()
            .insert(key.to_string(), entry)
            .map(|previous| previous.value)
    }

    /// Refreshes a valid entry, or creates a fresh one with `make()` when the
    /// key is absent or its entry has already expired.
    ///
    /// Returns `true` when a fresh entry was created.
    pub fn upsert_with(&self, key: &str, ttl: Duration, make: impl FnOnce() -> V) -> bool {
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired_at(now) => {
                entry.last_seen = now;
                false
            }
            _ => {
                entries.insert(key.to_string(), TtlEntry::new(make(), ttl, now));
                true
            }
        }
    }

    /// Refreshes an existing entry to now.
    ///
    /// Returns `false` (and creates nothing) when the key is unknown.
    pub fn touch(&self, key: &str) -> bool {
        self.touch_at(key, Instant::now())
    }

    /// Refreshes an existing entry to `seen_at`.
    ///
    /// An observation older than the current `last_seen` is ignored, so a
    /// late-arriving signal can never shorten an entry's life.
    pub fn touch_at(&self, key: &str, seen_at: Instant) -> bool {
        match self.lock().get_mut(key) {
            Some(entry) => {
                if seen_at > entry.last_seen {
                    entry.last_seen = seen_at;
                }
                true
            }
            None => false,
        }
    }

    /// Removes the entry for `key`, returning its value.
    pub fn remove(&self, key: &str) -> Option<V> {
        self.lock().remove(key).map(|entry| entry.value)
    }

    /// Removes the entry for `key` only if `predicate` accepts its value.
    ///
    /// Used to remove *a specific* session without clobbering a newer one that
    /// replaced it under the same address.
    pub fn remove_if(&self, key: &str, predicate: impl FnOnce(&V) -> bool) -> Option<V> {
        let mut entries = self.lock();
        let matches = entries.get(key).map(|entry| predicate(&entry.value))?;
        if matches {
            entries.remove(key).map(|entry| entry.value)
        } else {
            None
        }
    }

    /// Removes and returns every entry that is expired at `now`.
    pub fn sweep_at(&self, now: Instant) -> Vec<(String, V)> {
        let mut entries = self.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        if !expired.is_empty() {
            trace!(
                count = expired.len(),
                remaining = entries.len() - expired.len(),
                "sweeping expired entries"
            );
        }
        expired
            .into_iter()
            .filter_map(|key| entries.remove(&key).map(|entry| (key, entry.value)))
            .collect()
    }

    /// Removes and returns every entry that is expired right now.
    pub fn sweep(&self) -> Vec<(String, V)> {
        self.sweep_at(Instant::now())
    }

    /// Removes and returns every entry regardless of liveness.
    pub fn drain(&self) -> Vec<(String, V)> {
        self.lock()
            .drain()
            .map(|(key, entry)| (key, entry.value))
            .collect()
    }

    /// Returns `true` when an entry (expired or not) exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Number of entries, including expired ones that have not been swept.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` when the registry holds no entries.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<V: Clone> TtlRegistry<V> {
    /// Returns a clone of the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<V> {
        self.lock().get(key).map(|entry| entry.value.clone())
    }

    /// Returns a clone of the full entry stored under `key`.
    pub fn entry(&self, key: &str) -> Option<TtlEntry<V>> {
        self.lock().get(key).cloned()
    }

    /// Returns a point-in-time copy of every entry.
    ///
    /// The lock is released before the caller sees the data, so callers may
    /// do slow or async work with the result.
    pub fn snapshot(&self) -> Vec<(String, TtlEntry<V>)> {
        self.lock()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }
}

impl<V> Default for TtlRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(10);

    #[tokio::test(start_paused = true)]
    async fn test_entry_is_present_strictly_before_deadline_and_swept_at_it() {
        // Arrange
        let registry = TtlRegistry::new();
        registry.insert("10.0.0.1:7000", (), TTL);

        // Act – one tick short of the deadline
        tokio::time::advance(TTL - Duration::from_millis(1)).await;
        let early = registry.sweep();

        // Assert
        assert!(early.is_empty());
        assert!(registry.contains("10.0.0.1:7000"));

        // Act – exactly at the deadline
        tokio::time::advance(Duration::from_millis(1)).await;
        let at_deadline = registry.sweep();

        // Assert
        assert_eq!(at_deadline.len(), 1);
        assert!(!registry.contains("10.0.0.1:7000"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_postpones_eviction() {
        let registry = TtlRegistry::new();
        registry.insert("a", 1u8, TTL);

        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(registry.touch("a"));
        tokio::time::advance(Duration::from_secs(8)).await;

        assert!(registry.sweep().is_empty(), "touched entry must survive");
        assert_eq!(registry.get("a"), Some(1));
    }

    #[test]
    fn test_touch_unknown_key_creates_nothing() {
        let registry: TtlRegistry<()> = TtlRegistry::new();
        assert!(!registry.touch("ghost"));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_at_never_moves_last_seen_backwards() {
        // Arrange
        let registry = TtlRegistry::new();
        let created = Instant::now();
        registry.insert("a", (), TTL);
        tokio::time::advance(Duration::from_secs(5)).await;
        registry.touch("a");

        // Act – a stale observation from before the last refresh
        registry.touch_at("a", created);

        // Assert
        let entry = registry.entry("a").unwrap();
        assert_eq!(entry.last_seen, created + Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upsert_with_refreshes_valid_entry_without_calling_make() {
        let registry = TtlRegistry::new();
        assert!(registry.upsert_with("a", TTL, || 1));

        tokio::time::advance(Duration::from_secs(3)).await;
        let created = registry.upsert_with("a", TTL, || 2);

        assert!(!created);
        assert_eq!(registry.get("a"), Some(1), "valid entry keeps its value");
    }

    #[tokio::test(start_paused = true)]
    async fn test_upsert_with_replaces_expired_but_unswept_entry() {
        let registry = TtlRegistry::new();
        registry.upsert_with("a", TTL, || 1);

        tokio::time::advance(TTL).await;
        let created = registry.upsert_with("a", TTL, || 2);

        assert!(created);
        assert_eq!(registry.get("a"), Some(2));
    }

    #[test]
    fn test_insert_returns_replaced_value() {
        let registry = TtlRegistry::new();
        assert_eq!(registry.insert("a", "first", TTL), None);
        assert_eq!(registry.insert("a", "second", TTL), Some("first"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_if_leaves_entry_when_predicate_rejects() {
        let registry = TtlRegistry::new();
        registry.insert("a", 7u32, TTL);

        assert_eq!(registry.remove_if("a", |v| *v == 8), None);
        assert!(registry.contains("a"));
        assert_eq!(registry.remove_if("a", |v| *v == 7), Some(7));
        assert!(!registry.contains("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_only_removes_expired_entries() {
        // Arrange – "old" is inserted first and "new" 6 s later
        let registry = TtlRegistry::new();
        registry.insert("old", (), TTL);
        tokio::time::advance(Duration::from_secs(6)).await;
        registry.insert("new", (), TTL);

        // Act
        tokio::time::advance(Duration::from_secs(5)).await;
        let removed: Vec<String> = registry.sweep().into_iter().map(|(k, _)| k).collect();

        // Assert
        assert_eq!(removed, vec!["old".to_string()]);
        assert!(registry.contains("new"));
    }

    #[test]
    fn test_drain_empties_registry() {
        let registry = TtlRegistry::new();
        registry.insert("a", (), TTL);
        registry.insert("b", (), TTL);

        let mut drained: Vec<String> = registry.drain().into_iter().map(|(k, _)| k).collect();
        drained.sort();

        assert_eq!(drained, vec!["a".to_string(), "b".to_string()]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_is_shareable_across_threads() {
        let registry = std::sync::Arc::new(TtlRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = std::sync::Arc::clone(&registry);
                std::thread::spawn(move || {
                    for j in 0..100 {
                        registry.insert(&format!("{i}-{j}"), j, TTL);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread panicked");
        }
        assert_eq!(registry.len(), 800);
    }
}
