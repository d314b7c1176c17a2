//! Stream and Snapshot Handlers
//!
//! - `GET /stream/{symbol}` - SSE stream of `price` and `heartbeat` events
//! - `GET /latest/{symbol}` - Latest cached entry, or `null`

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use tokio::time::{Instant, interval_at};
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::error::ApiError;
use crate::application::services::SubscriptionService;
use crate::domain::cache::TickCache;
use crate::domain::market::{CacheEntry, Symbol};
use crate::domain::symbols::SymbolAllowList;
use crate::infrastructure::broadcast::{Broadcaster, StreamEvent};
use crate::infrastructure::health::{self, HealthState};
use crate::infrastructure::metrics::{self, EventKind};

// =============================================================================
// Application State
// =============================================================================

/// Shared state for the stream and snapshot handlers.
pub struct AppState {
    /// Symbols clients may request.
    pub symbols: SymbolAllowList,
    /// Latest tick per symbol.
    pub cache: Arc<TickCache>,
    /// Live SSE connections.
    pub broadcaster: Arc<Broadcaster>,
    /// Upstream subscriptions.
    pub subscriptions: Arc<SubscriptionService>,
    /// Keep-alive period for SSE connections.
    pub heartbeat_interval: Duration,
    /// Whether `/latest` also ensures the upstream subscription.
    pub latest_subscribes: bool,
    /// Ends open SSE streams on shutdown.
    pub shutdown: CancellationToken,
}

impl AppState {
    fn resolve(&self, requested: &str) -> Result<Symbol, ApiError> {
        self.symbols
            .resolve(requested)
            .cloned()
            .ok_or_else(|| ApiError::UnknownSymbol(requested.to_string()))
    }
}

/// Build the relay router: streams, snapshots, health and metrics.
#[must_use]
pub fn router(state: Arc<AppState>, health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/stream/{symbol}", get(stream_handler))
        .route("/latest/{symbol}", get(latest_handler))
        .with_state(state)
        .merge(health::router(health_state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// =============================================================================
// Handlers
// =============================================================================

async fn stream_handler(
    State(state): State<Arc<AppState>>,
    Path(requested): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let symbol = state.resolve(&requested).inspect_err(|_| {
        tracing::debug!(symbol = %requested, "Rejected stream for unknown symbol");
    })?;

    state.subscriptions.ensure_subscribed(&symbol).await?;

    // Registering under the cache read lock means a tick lands either in the
    // snapshot or in the channel, never both
    let key = symbol.key();
    let (subscriber, snapshot) = state.cache.read_with(&key, |entry| {
        (
            state.broadcaster.register(key.clone()),
            entry.cloned().map(StreamEvent::Price),
        )
    });
    if snapshot.is_some() {
        metrics::record_events_sent(EventKind::Price, 1);
    }

    tracing::info!(
        symbol = %symbol,
        connection_id = subscriber.id(),
        has_snapshot = snapshot.is_some(),
        "SSE client connected"
    );

    // First heartbeat one full period after connect
    let period = state.heartbeat_interval;
    let heartbeats = IntervalStream::new(interval_at(Instant::now() + period, period)).map(
        move |_| {
            let heartbeat = StreamEvent::heartbeat(&key);
            metrics::record_events_sent(heartbeat.kind(), 1);
            heartbeat
        },
    );

    // The subscriber (and with it the registration) lives exactly as long as
    // this stream; axum drops the stream when the client goes away.
    let events = stream::iter(snapshot)
        .chain(stream::select(subscriber, heartbeats))
        .take_until(state.shutdown.clone().cancelled_owned())
        .map(to_sse_event);

    Ok(Sse::new(events))
}

async fn latest_handler(
    State(state): State<Arc<AppState>>,
    Path(requested): Path<String>,
) -> Result<Json<Option<CacheEntry>>, ApiError> {
    let symbol = state.resolve(&requested)?;

    if state.latest_subscribes
        && let Err(e) = state.subscriptions.ensure_subscribed(&symbol).await
    {
        tracing::warn!(symbol = %symbol, error = %e, "Subscription from snapshot request failed");
    }

    Ok(Json(state.cache.get(&symbol.key())))
}

fn to_sse_event(event: StreamEvent) -> Result<Event, axum::Error> {
    let sse = Event::default().event(event.name());
    match event {
        StreamEvent::Price(entry) => sse.json_data(entry),
        StreamEvent::Heartbeat(heartbeat) => sse.json_data(heartbeat),
    }
}

// =============================================================================
// Tests
// =============================================================================
