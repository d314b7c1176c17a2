//! Tick Relay
//!
//! The ingestion side of the relay: every tick delivered by the upstream
//! adapter is stored in the cache and immediately fanned out to clients
//! watching its symbol.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::application::ports::{PriceFanout, TickSink};
use crate::domain::cache::TickCache;
use crate::domain::market::PriceTick;
use crate::infrastructure::metrics;

/// What the periodic refresh does with cached entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshPolicy {
    /// No periodic refresh.
    #[default]
    Off,
    /// Re-stamp cached entries so polling clients see fresh timestamps.
    Cache,
    /// Re-stamp cached entries and push them to stream clients as well.
    Broadcast,
}

impl RefreshPolicy {
    /// Parse policy from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "cache" => Self::Cache,
            "broadcast" => Self::Broadcast,
            _ => Self::Off,
        }
    }

    /// Get the policy name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Cache => "cache",
            Self::Broadcast => "broadcast",
        }
    }
}

/// Caches ticks and publishes them to connected clients.
pub struct TickRelay {
    cache: Arc<TickCache>,
    fanout: Arc<dyn PriceFanout>,
}

impl TickRelay {
    /// Create a relay writing into `cache` and publishing through `fanout`.
    #[must_use]
    pub fn new(cache: Arc<TickCache>, fanout: Arc<dyn PriceFanout>) -> Self {
        Self { cache, fanout }
    }

    /// The cache this relay writes into.
    #[must_use]
    pub fn cache(&self) -> &Arc<TickCache> {
        &self.cache
    }

    /// Apply the refresh policy once.
    ///
    /// Returns the number of entries refreshed.
    pub fn refresh(&self, policy: RefreshPolicy) -> usize {
        if policy == RefreshPolicy::Off {
            return 0;
        }

        if policy == RefreshPolicy::Broadcast {
            self.cache.refresh_with(|entry| {
                self.fanout.publish(entry);
            })
        } else {
            self.cache.refresh()
        }
    }

    /// Run the refresh policy every `interval` until cancelled.
    pub async fn run_refresh(
        self: Arc<Self>,
        policy: RefreshPolicy,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        if policy == RefreshPolicy::Off {
            return;
        }

        tracing::info!(
            policy = policy.as_str(),
            interval_ms = interval.as_millis(),
            "Cache refresh started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let refreshed = self.refresh(policy);
                    tracing::trace!(refreshed, "Cache refreshed");
                }
            }
        }

        tracing::info!("Cache refresh stopped");
    }
}

impl TickSink for TickRelay {
    fn on_tick(&self, tick: PriceTick) {
        let started = Instant::now();
        metrics::record_tick_received();

        // Published under the cache lock so a concurrent refresh cannot
        // overtake this tick
        let mut delivered = 0;
        let entry = self
            .cache
            .put_with(tick, |entry| delivered = self.fanout.publish(entry));

        tracing::trace!(symbol = %entry.price.symbol(), delivered, "Tick relayed");
        metrics::record_processing_duration(started.elapsed());
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{OnceLock, Weak};
    use std::thread;

    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::domain::market::{CacheEntry, SymbolKey};

    /// Records every published entry.
    #[derive(Default)]
    struct RecordingFanout {
        published: Mutex<Vec<CacheEntry>>,
    }

    impl PriceFanout for RecordingFanout {
        fn publish(&self, entry: &CacheEntry) -> usize {
            self.published.lock().push(entry.clone());
            1
        }
    }

    fn relay() -> (TickRelay, Arc<RecordingFanout>) {
        let fanout = Arc::new(RecordingFanout::default());
        let relay = TickRelay::new(Arc::new(TickCache::new()), fanout.clone());
        (relay, fanout)
    }

    fn tick(symbol: &str, bid: f64) -> PriceTick {
        PriceTick::from_value(json!({"symbol": symbol, "bid": bid})).unwrap()
    }

    #[test]
    fn refresh_policy_parsing() {
        assert_eq!(
            RefreshPolicy::from_str_case_insensitive("cache"),
            RefreshPolicy::Cache
        );
        assert_eq!(
            RefreshPolicy::from_str_case_insensitive("BROADCAST"),
            RefreshPolicy::Broadcast
        );
        assert_eq!(
            RefreshPolicy::from_str_case_insensitive("off"),
            RefreshPolicy::Off
        );
        assert_eq!(
            RefreshPolicy::from_str_case_insensitive("bogus"),
            RefreshPolicy::Off
        );
    }

    #[test]
    fn tick_is_cached_then_published() {
        let (relay, fanout) = relay();

        relay.on_tick(tick("EURUSD.a", 1.1));

        let cached = relay
            .cache()
            .get(&SymbolKey::from_requested("EURUSD.A"))
            .unwrap();
        let published = fanout.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0], cached);
    }

    #[test]
    fn ticks_published_in_delivery_order() {
        let (relay, fanout) = relay();

        relay.on_tick(tick("EURUSD.a", 1.1));
        relay.on_tick(tick("GBPUSD.a", 1.3));
        relay.on_tick(tick("EURUSD.a", 1.2));

        let bids: Vec<_> = fanout
            .published
            .lock()
            .iter()
            .map(|e| e.price.raw()["bid"].as_f64().unwrap())
            .collect();
        assert_eq!(bids, vec![1.1, 1.3, 1.2]);
    }

    #[test]
    fn refresh_off_does_nothing() {
        let (relay, fanout) = relay();
        relay.on_tick(tick("EURUSD.a", 1.1));

        assert_eq!(relay.refresh(RefreshPolicy::Off), 0);
        assert_eq!(fanout.published.lock().len(), 1);
    }

    #[test]
    fn refresh_cache_does_not_publish() {
        let (relay, fanout) = relay();
        relay.on_tick(tick("EURUSD.a", 1.1));

        assert_eq!(relay.refresh(RefreshPolicy::Cache), 1);
        assert_eq!(fanout.published.lock().len(), 1);
    }

    #[test]
    fn refresh_broadcast_publishes_entries() {
        let (relay, fanout) = relay();
        relay.on_tick(tick("EURUSD.a", 1.1));
        relay.on_tick(tick("GBPUSD.a", 1.3));

        assert_eq!(relay.refresh(RefreshPolicy::Broadcast), 2);
        assert_eq!(fanout.published.lock().len(), 4);
    }

    /// Fan-out that, on its first publish, starts a concurrent tick for
    /// EURUSD on another thread.
    #[derive(Default)]
    struct RacingFanout {
        relay: OnceLock<Weak<TickRelay>>,
        armed: AtomicBool,
        racer: Mutex<Option<thread::JoinHandle<()>>>,
        published: Mutex<Vec<CacheEntry>>,
    }

    impl PriceFanout for RacingFanout {
        fn publish(&self, entry: &CacheEntry) -> usize {
            self.published.lock().push(entry.clone());
            if self.armed.swap(false, Ordering::SeqCst) {
                let relay = self.relay.get().and_then(Weak::upgrade).unwrap();
                *self.racer.lock() = Some(thread::spawn(move || {
                    relay.on_tick(tick("EURUSD.a", 2.0));
                }));
                thread::sleep(Duration::from_millis(20));
            }
            1
        }
    }

    #[test]
    fn broadcast_refresh_never_overtakes_newer_tick() {
        let fanout = Arc::new(RacingFanout::default());
        let relay = Arc::new(TickRelay::new(Arc::new(TickCache::new()), fanout.clone()));
        fanout.relay.set(Arc::downgrade(&relay)).unwrap();

        relay.on_tick(tick("GBPUSD.a", 1.0));
        relay.on_tick(tick("EURUSD.a", 1.1));
        fanout.published.lock().clear();
        fanout.armed.store(true, Ordering::SeqCst);

        relay.refresh(RefreshPolicy::Broadcast);
        let racer = fanout.racer.lock().take().unwrap();
        racer.join().unwrap();

        let key = SymbolKey::from_requested("EURUSD.a");
        let cached = relay.cache().get(&key).unwrap();
        let last_pushed = fanout
            .published
            .lock()
            .iter()
            .rev()
            .find(|entry| entry.key() == key)
            .cloned()
            .unwrap();
        assert_eq!(cached.price.raw()["bid"], json!(2.0));
        assert_eq!(last_pushed, cached);
    }

    #[tokio::test]
    async fn run_refresh_stops_on_cancel() {
        let (relay, _fanout) = relay();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(Arc::new(relay).run_refresh(
            RefreshPolicy::Cache,
            Duration::from_millis(5),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
