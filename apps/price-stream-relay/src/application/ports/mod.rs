//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `MarketDataPort`: upstream market data subscriptions (MetaApi)
//! - `PriceFanout`: delivery of cache updates to connected clients
//!
//! ## Driver Ports (Inbound)
//!
//! - `TickSink`: single ingestion point for upstream ticks

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::market::{CacheEntry, PriceTick, Symbol};

/// Errors returned by the upstream market data service.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MarketDataError {
    /// The upstream connection is not available.
    #[error("upstream connection is not available")]
    NotConnected,

    /// The upstream rejected the request.
    #[error("upstream rejected subscription to {symbol}: {message}")]
    Rejected {
        /// Symbol that was requested.
        symbol: String,
        /// Upstream error description.
        message: String,
    },

    /// No response within the request timeout.
    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),

    /// Sending the request failed.
    #[error("upstream transport error: {0}")]
    Transport(String),
}

/// Upstream market data subscriptions.
///
/// `subscribe` suspends until the upstream acknowledges the request.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataPort: Send + Sync {
    /// Start receiving ticks for `symbol`.
    async fn subscribe(&self, symbol: &Symbol) -> Result<(), MarketDataError>;
}

/// Receives every normalized tick, one call per tick, in delivery order.
pub trait TickSink: Send + Sync {
    /// Ingest one tick.
    fn on_tick(&self, tick: PriceTick);
}

/// Pushes cache updates to clients watching the entry's symbol.
pub trait PriceFanout: Send + Sync {
    /// Deliver `entry` to matching clients; returns how many received it.
    fn publish(&self, entry: &CacheEntry) -> usize;
}
