//! Health Check and Metrics Endpoints
//!
//! Health checks, connection status reporting and Prometheus metrics, served
//! on the relay's HTTP port. Used by container orchestrators, load balancers
//! and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness check (simple OK)
//! - `GET /readyz` - Kubernetes readiness check (requires a connected upstream feed)
//! - `GET /metrics` - Prometheus metrics in text format

use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::services::SubscriptionService;
use crate::domain::cache::TickCache;
use crate::infrastructure::broadcast::Broadcaster;
use crate::infrastructure::metaapi::{ConnectionState, FeedState};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Relay version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream feed status.
    pub upstream: FeedInfo,
    /// Connected SSE clients.
    pub clients: ClientStatus,
    /// Subscription and cache statistics.
    pub subscriptions: SubscriptionStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Upstream connected.
    Healthy,
    /// Upstream still connecting or synchronizing.
    Degraded,
    /// Upstream unavailable.
    Unhealthy,
}

/// Upstream feed status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Connection state.
    pub state: String,
    /// Whether the feed is connected.
    pub connected: bool,
    /// When the feed last became connected.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last connection error.
    pub error_message: Option<String>,
    /// Ticks received.
    pub ticks_received: u64,
    /// Ticks discarded for lacking a symbol.
    pub ticks_discarded: u64,
}

/// Active client information.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStatus {
    /// Total connected SSE clients.
    pub total: usize,
}

/// Subscription statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    /// Number of symbols subscribed upstream.
    pub upstream_symbols: usize,
    /// Number of symbols with a cached tick.
    pub cached_symbols: usize,
    /// Subscribed symbols, in the broker's spelling.
    pub subscribed: Vec<String>,
    /// Cached symbol keys.
    pub cached: Vec<String>,
}

// =============================================================================
// Health State
// =============================================================================

/// Shared state for the health endpoints.
pub struct HealthState {
    version: String,
    started_at: Instant,
    feed: Arc<FeedState>,
    broadcaster: Arc<Broadcaster>,
    subscriptions: Arc<SubscriptionService>,
    cache: Arc<TickCache>,
}

impl HealthState {
    /// Create new health state.
    #[must_use]
    pub fn new(
        version: String,
        feed: Arc<FeedState>,
        broadcaster: Arc<Broadcaster>,
        subscriptions: Arc<SubscriptionService>,
        cache: Arc<TickCache>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            feed,
            broadcaster,
            subscriptions,
            cache,
        }
    }
}

/// Routes for the health and metrics endpoints.
#[must_use]
pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    if state.feed.is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthState) -> HealthResponse {
    let upstream = feed_state_to_info(&state.feed);

    HealthResponse {
        status: determine_health_status(state.feed.get_state()),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        upstream,
        clients: ClientStatus {
            total: state.broadcaster.connection_count(),
        },
        subscriptions: SubscriptionStatus {
            upstream_symbols: state.subscriptions.subscribed_count(),
            cached_symbols: state.cache.len(),
            subscribed: state
                .subscriptions
                .subscribed_symbols()
                .iter()
                .map(ToString::to_string)
                .collect(),
            cached: state
                .cache
                .symbols()
                .iter()
                .map(ToString::to_string)
                .collect(),
        },
    }
}

fn feed_state_to_info(state: &FeedState) -> FeedInfo {
    let connection_state = state.get_state();

    FeedInfo {
        state: connection_state.as_str().to_string(),
        connected: connection_state == ConnectionState::Connected,
        last_connected_at: state.last_connected_at(),
        error_message: state.error_message(),
        ticks_received: state.get_ticks_received(),
        ticks_discarded: state.get_ticks_discarded(),
    }
}

const fn determine_health_status(state: ConnectionState) -> HealthStatus {
    match state {
        ConnectionState::Connected => HealthStatus::Healthy,
        ConnectionState::Connecting | ConnectionState::Synchronizing => HealthStatus::Degraded,
        ConnectionState::Disconnected | ConnectionState::Error => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Tests
// =============================================================================
