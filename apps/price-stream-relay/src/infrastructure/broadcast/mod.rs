//! Fan-out Broadcaster
//!
//! Delivers cache updates to every live SSE connection watching the
//! updated symbol.
//!
//! # Architecture
//!
//! Each connection owns a bounded `mpsc` channel. The broadcaster keeps the
//! sending halves indexed by symbol key, so a broadcast only touches the
//! connections for that symbol. Delivery uses `try_send`: a connection whose
//! buffer is full misses the event rather than stalling the feed.
//!
//! A connection is removed when its [`Subscriber`] is dropped, which happens
//! when the HTTP response stream ends for any reason.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::application::ports::PriceFanout;
use crate::domain::cache::now_millis;
use crate::domain::market::{CacheEntry, SymbolKey, Timestamp};
use crate::infrastructure::metrics::{self, EventKind};

// =============================================================================
// Stream Events
// =============================================================================

/// Identifier assigned to each registered connection.
pub type ConnectionId = u64;

/// Keep-alive payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Heartbeat {
    /// When the heartbeat was emitted.
    pub timestamp: Timestamp,
    /// Symbol the connection is watching.
    pub symbol: String,
}

/// An event destined for one SSE connection.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A cache update for the connection's symbol.
    Price(CacheEntry),
    /// Periodic keep-alive.
    Heartbeat(Heartbeat),
}

impl StreamEvent {
    /// Heartbeat for `key`, stamped now.
    #[must_use]
    pub fn heartbeat(key: &SymbolKey) -> Self {
        Self::Heartbeat(Heartbeat {
            timestamp: now_millis(),
            symbol: key.to_string(),
        })
    }

    /// SSE event name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Price(_) => "price",
            Self::Heartbeat(_) => "heartbeat",
        }
    }

    /// Metric label for this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Price(_) => EventKind::Price,
            Self::Heartbeat(_) => EventKind::Heartbeat,
        }
    }
}

// =============================================================================
// Broadcaster
// =============================================================================

type Registry = HashMap<SymbolKey, HashMap<ConnectionId, mpsc::Sender<StreamEvent>>>;

/// Registry of live connections, indexed by symbol.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use price_stream_relay::domain::market::SymbolKey;
/// use price_stream_relay::infrastructure::broadcast::Broadcaster;
///
/// let broadcaster = Arc::new(Broadcaster::new(16));
/// let subscriber = broadcaster.register(SymbolKey::from_requested("eurusd.a"));
/// assert_eq!(broadcaster.connection_count(), 1);
///
/// drop(subscriber);
/// assert_eq!(broadcaster.connection_count(), 0);
/// ```
#[derive(Debug)]
pub struct Broadcaster {
    next_id: AtomicU64,
    buffer: usize,
    connections: RwLock<Registry>,
}

impl Broadcaster {
    /// Create a broadcaster whose connections buffer up to `buffer` events.
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection for `key`.
    ///
    /// The connection stays registered until the returned [`Subscriber`] is
    /// dropped.
    #[must_use]
    pub fn register(self: &Arc<Self>, key: SymbolKey) -> Subscriber {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);

        let total = {
            let mut connections = self.connections.write();
            connections.entry(key.clone()).or_default().insert(id, tx);
            connections.values().map(HashMap::len).sum()
        };
        metrics::set_sse_clients(total);
        tracing::debug!(connection_id = id, symbol = %key, clients = total, "Client registered");

        Subscriber {
            receiver: rx,
            guard: ConnectionGuard {
                broadcaster: Arc::clone(self),
                key,
                id,
            },
        }
    }

    /// Remove a connection.
    ///
    /// Returns `false` if it was not registered.
    pub fn deregister(&self, key: &SymbolKey, id: ConnectionId) -> bool {
        let (removed, total) = {
            let mut connections = self.connections.write();
            let removed = connections
                .get_mut(key)
                .is_some_and(|watchers| watchers.remove(&id).is_some());
            if connections.get(key).is_some_and(HashMap::is_empty) {
                connections.remove(key);
            }
            (removed, connections.values().map(HashMap::len).sum())
        };

        if removed {
            metrics::set_sse_clients(total);
            tracing::debug!(connection_id = id, symbol = %key, clients = total, "Client deregistered");
        }
        removed
    }

    /// Deliver `entry` to every connection watching its symbol.
    ///
    /// Returns the number of connections the event was queued for.
    pub fn broadcast(&self, entry: &CacheEntry) -> usize {
        let key = entry.key();
        let connections = self.connections.read();
        let Some(watchers) = connections.get(&key) else {
            return 0;
        };

        let mut delivered = 0u64;
        let mut dropped = 0u64;
        for (id, tx) in watchers {
            match tx.try_send(StreamEvent::Price(entry.clone())) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    dropped += 1;
                    tracing::debug!(connection_id = id, symbol = %key, "Client buffer full, event dropped");
                }
                // Receiver gone; its guard is about to deregister it
                Err(TrySendError::Closed(_)) => {}
            }
        }
        drop(connections);

        if delivered > 0 {
            metrics::record_events_sent(EventKind::Price, delivered);
        }
        if dropped > 0 {
            metrics::record_events_dropped(EventKind::Price, dropped);
        }

        usize::try_from(delivered).unwrap_or(usize::MAX)
    }

    /// Total number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.read().values().map(HashMap::len).sum()
    }

    /// Number of connections watching `key`.
    #[must_use]
    pub fn watcher_count(&self, key: &SymbolKey) -> usize {
        self.connections.read().get(key).map_or(0, HashMap::len)
    }
}

impl PriceFanout for Broadcaster {
    fn publish(&self, entry: &CacheEntry) -> usize {
        self.broadcast(entry)
    }
}

// =============================================================================
// Subscriber
// =============================================================================

/// Deregisters its connection when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    broadcaster: Arc<Broadcaster>,
    key: SymbolKey,
    id: ConnectionId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.broadcaster.deregister(&self.key, self.id);
    }
}

/// Receiving side of a registered connection.
///
/// Yields the price events broadcast for its symbol. Dropping it
/// deregisters the connection.
#[derive(Debug)]
pub struct Subscriber {
    receiver: mpsc::Receiver<StreamEvent>,
    guard: ConnectionGuard,
}

impl Subscriber {
    /// Connection id.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.guard.id
    }

    /// Symbol key this connection watches.
    #[must_use]
    pub const fn key(&self) -> &SymbolKey {
        &self.guard.key
    }

    /// Wait for the next event.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.receiver.recv().await
    }
}

impl Stream for Subscriber {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::market::PriceTick;

    fn entry(symbol: &str, bid: f64) -> CacheEntry {
        CacheEntry {
            timestamp: 1_700_000_000_000,
            price: PriceTick::from_value(json!({"symbol": symbol, "bid": bid})).unwrap(),
        }
    }

    fn key(symbol: &str) -> SymbolKey {
        SymbolKey::from_requested(symbol)
    }

    #[tokio::test]
    async fn broadcast_reaches_only_matching_connections() {
        let broadcaster = Arc::new(Broadcaster::new(8));
        let mut eur_a = broadcaster.register(key("EURUSD.A"));
        let mut eur_b = broadcaster.register(key("eurusd.a"));
        let mut gbp = broadcaster.register(key("GBPUSD.A"));

        let delivered = broadcaster.broadcast(&entry("EURUSD.a", 1.1));

        assert_eq!(delivered, 2);
        assert_eq!(eur_a.recv().await, Some(StreamEvent::Price(entry("EURUSD.a", 1.1))));
        assert_eq!(eur_b.recv().await, Some(StreamEvent::Price(entry("EURUSD.a", 1.1))));
        assert!(gbp.receiver.try_recv().is_err());
    }

    #[test]
    fn broadcast_without_watchers_is_noop() {
        let broadcaster = Broadcaster::new(8);
        assert_eq!(broadcaster.broadcast(&entry("EURUSD.a", 1.1)), 0);
    }

    #[test]
    fn dropping_subscriber_deregisters() {
        let broadcaster = Arc::new(Broadcaster::new(8));
        let first = broadcaster.register(key("EURUSD.A"));
        let second = broadcaster.register(key("EURUSD.A"));
        assert_eq!(broadcaster.watcher_count(&key("EURUSD.A")), 2);

        drop(first);
        assert_eq!(broadcaster.watcher_count(&key("EURUSD.A")), 1);

        drop(second);
        assert_eq!(broadcaster.connection_count(), 0);
        assert!(broadcaster.connections.read().is_empty());
    }

    #[test]
    fn deregister_unknown_connection() {
        let broadcaster = Broadcaster::new(8);
        assert!(!broadcaster.deregister(&key("EURUSD.A"), 42));
    }

    #[tokio::test]
    async fn deregistered_connection_gets_nothing() {
        let broadcaster = Arc::new(Broadcaster::new(8));
        let subscriber = broadcaster.register(key("EURUSD.A"));
        let id = subscriber.id();
        drop(subscriber);

        assert!(!broadcaster.deregister(&key("EURUSD.A"), id));
        assert_eq!(broadcaster.broadcast(&entry("EURUSD.a", 1.1)), 0);
    }

    #[tokio::test]
    async fn full_buffer_drops_events() {
        let broadcaster = Arc::new(Broadcaster::new(2));
        let mut subscriber = broadcaster.register(key("EURUSD.A"));

        assert_eq!(broadcaster.broadcast(&entry("EURUSD.a", 1.1)), 1);
        assert_eq!(broadcaster.broadcast(&entry("EURUSD.a", 1.2)), 1);
        assert_eq!(broadcaster.broadcast(&entry("EURUSD.a", 1.3)), 0);

        assert_eq!(subscriber.recv().await, Some(StreamEvent::Price(entry("EURUSD.a", 1.1))));
        assert_eq!(subscriber.recv().await, Some(StreamEvent::Price(entry("EURUSD.a", 1.2))));
        assert!(subscriber.receiver.try_recv().is_err());
    }

    #[test]
    fn connection_ids_are_unique() {
        let broadcaster = Arc::new(Broadcaster::new(8));
        let a = broadcaster.register(key("EURUSD.A"));
        let b = broadcaster.register(key("EURUSD.A"));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn heartbeat_carries_symbol() {
        let event = StreamEvent::heartbeat(&key("eurusd.a"));
        assert_eq!(event.name(), "heartbeat");
        let StreamEvent::Heartbeat(heartbeat) = event else {
            panic!("expected heartbeat");
        };
        assert_eq!(heartbeat.symbol, "EURUSD.A");
        assert!(heartbeat.timestamp > 0);
    }

    #[test]
    fn thread_safety_concurrent_registration() {
        use std::thread;

        let broadcaster = Arc::new(Broadcaster::new(8));
        let handles: Vec<_> = (0..10)
            .map(|i| {
                let broadcaster = Arc::clone(&broadcaster);
                thread::spawn(move || {
                    let subscriber = broadcaster.register(key(&format!("SYM{}", i % 3)));
                    subscriber.id()
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // Every subscriber was dropped at the end of its thread
        assert_eq!(broadcaster.connection_count(), 0);
    }
}
