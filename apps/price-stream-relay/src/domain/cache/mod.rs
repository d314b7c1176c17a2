//! Tick Cache
//!
//! Holds the most recent tick per symbol. Every write replaces the previous
//! entry for that symbol; nothing older is retained.
//!
//! Timestamps are taken from the wall clock but clamped so that they never
//! move backwards for a given symbol.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;

use super::market::{CacheEntry, PriceTick, SymbolKey, Timestamp};

/// Latest-tick store shared between the ingestion path and HTTP readers.
///
/// # Example
///
/// ```rust
/// use price_stream_relay::domain::cache::TickCache;
/// use price_stream_relay::domain::market::{PriceTick, SymbolKey};
///
/// let cache = TickCache::new();
/// let tick = PriceTick::from_value(serde_json::json!({"symbol": "EURUSD.a", "bid": 1.1})).unwrap();
///
/// cache.put(tick);
///
/// let entry = cache.get(&SymbolKey::from_requested("eurusd.a")).unwrap();
/// assert_eq!(entry.price.symbol().as_str(), "EURUSD.a");
/// ```
#[derive(Debug, Default)]
pub struct TickCache {
    entries: RwLock<HashMap<SymbolKey, CacheEntry>>,
}

impl TickCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a tick stamped with the current time, replacing any prior entry.
    ///
    /// Returns the stored entry.
    pub fn put(&self, tick: PriceTick) -> CacheEntry {
        self.put_at_with(tick, now_millis(), |_| {})
    }

    /// Store a tick stamped with `now`, clamped to the previous entry's time.
    #[cfg(test)]
    fn put_at(&self, tick: PriceTick, now: Timestamp) -> CacheEntry {
        self.put_at_with(tick, now, |_| {})
    }

    /// Store a tick and hand the stored entry to `publish` before releasing
    /// the write lock.
    ///
    /// Entries handed out by `put_with` and [`refresh_with`](Self::refresh_with)
    /// therefore reach `publish` in the order they were written.
    pub fn put_with(&self, tick: PriceTick, publish: impl FnOnce(&CacheEntry)) -> CacheEntry {
        self.put_at_with(tick, now_millis(), publish)
    }

    fn put_at_with(
        &self,
        tick: PriceTick,
        now: Timestamp,
        publish: impl FnOnce(&CacheEntry),
    ) -> CacheEntry {
        let key = tick.key();
        let mut entries = self.entries.write();

        let timestamp = entries
            .get(&key)
            .map_or(now, |previous| previous.timestamp.max(now));
        let entry = CacheEntry {
            timestamp,
            price: tick,
        };
        entries.insert(key, entry.clone());
        publish(&entry);

        entry
    }

    /// Get the current entry for a symbol.
    #[must_use]
    pub fn get(&self, key: &SymbolKey) -> Option<CacheEntry> {
        self.entries.read().get(key).cloned()
    }

    /// Run `f` on the current entry for a symbol while holding the read lock.
    ///
    /// No write can land while `f` runs.
    pub fn read_with<R>(&self, key: &SymbolKey, f: impl FnOnce(Option<&CacheEntry>) -> R) -> R {
        f(self.entries.read().get(key))
    }

    /// Re-stamp every entry with the current time.
    ///
    /// Returns the number of entries refreshed. The ticks themselves are
    /// unchanged.
    pub fn refresh(&self) -> usize {
        self.refresh_with(|_| {})
    }

    /// Re-stamp every entry and hand each one to `publish` before releasing
    /// the write lock.
    pub fn refresh_with(&self, publish: impl FnMut(&CacheEntry)) -> usize {
        self.refresh_at_with(now_millis(), publish)
    }

    /// Re-stamp every entry with `now`, never moving a timestamp backwards.
    #[cfg(test)]
    fn refresh_at(&self, now: Timestamp) -> Vec<CacheEntry> {
        let mut refreshed = Vec::new();
        self.refresh_at_with(now, |entry| refreshed.push(entry.clone()));
        refreshed
    }

    fn refresh_at_with(&self, now: Timestamp, mut publish: impl FnMut(&CacheEntry)) -> usize {
        let mut entries = self.entries.write();
        for entry in entries.values_mut() {
            entry.timestamp = entry.timestamp.max(now);
            publish(entry);
        }
        entries.len()
    }

    /// Number of symbols with a cached tick.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no tick has been cached yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Keys of all cached symbols, sorted.
    #[must_use]
    pub fn symbols(&self) -> Vec<SymbolKey> {
        let mut keys: Vec<_> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Current wall-clock time in Unix epoch milliseconds.
#[must_use]
pub fn now_millis() -> Timestamp {
    Utc::now().timestamp_millis()
}

// =============================================================================
// Tests
// =============================================================================
