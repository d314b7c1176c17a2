#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Price Stream Relay - Tick Cache and SSE Fan-out
//!
//! Holds a single streaming connection to MetaApi, caches the latest tick
//! per symbol and relays updates to browser clients over Server-Sent
//! Events. A polling endpoint serves the cached snapshot.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Core relay types and state
//!   - `market`: Symbols, ticks and cache entries
//!   - `cache`: Latest tick per symbol
//!   - `subscription`: Symbols subscribed upstream
//!   - `symbols`: Allow-list of tradable symbols
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Interfaces for the upstream feed and client fan-out
//!   - `services`: Lazy subscriptions, tick ingestion and refresh
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `metaapi`: WebSocket client for the MetaApi stream
//!   - `broadcast`: Per-symbol fan-out to SSE connections
//!   - `http`: Stream and snapshot endpoints
//!   - `health`: Health, readiness and metrics endpoints
//!   - `config`: Configuration loading
//!
//! # Data Flow
//!
//! ```text
//!                   ┌─────────────┐     ┌─────────────┐
//! MetaApi WS ──────►│  Tick Cache │────►│ Broadcaster │──► /stream client 1
//!                   └──────┬──────┘     └─────────────┘──► /stream client N
//!                          │
//!                          └──────────────────────────────► /latest
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core relay types with no external I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::cache::TickCache;
pub use domain::market::{CacheEntry, PriceTick, Symbol, SymbolKey, Timestamp};
pub use domain::subscription::SubscriptionSet;
pub use domain::symbols::{DEFAULT_SYMBOLS, SymbolAllowList};

// Application ports and services
pub use application::ports::{MarketDataError, MarketDataPort, PriceFanout, TickSink};
pub use application::services::{RefreshPolicy, SubscribeOutcome, SubscriptionService, TickRelay};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, Credentials, RefreshSettings, RelayConfig, ServerSettings, StreamSettings,
    UpstreamSettings,
};

// Fan-out (for integration tests)
pub use infrastructure::broadcast::{Broadcaster, StreamEvent, Subscriber};

// HTTP edge (for integration tests)
pub use infrastructure::health::HealthState;
pub use infrastructure::http::{ApiError, AppState, RelayServer, ServerError};

// Upstream adapter
pub use infrastructure::metaapi::{ConnectionState, FeedState, MetaApiClient, MetaApiError};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
