//! Price Stream Relay Binary
//!
//! Starts the MetaApi price relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-stream-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `METAAPI_TOKEN`: MetaApi API token
//! - `METAAPI_ACCOUNT_ID`: MetaApi trading account id
//!
//! ## Optional
//! - `PORT`: HTTP port for streams, snapshots, health and metrics (default: 8080)
//! - `METAAPI_REGION`: MetaApi region (default: new-york)
//! - `METAAPI_DOMAIN`: MetaApi domain (default: agiliumtrade.ai)
//! - `METAAPI_URL`: Full streaming URL, overrides region/domain
//! - `METAAPI_TICK_INTERVAL_MS`: Requested tick throttle (default: 250)
//! - `METAAPI_CONNECT_TIMEOUT_SECS`: Connect timeout (default: 30)
//! - `METAAPI_SYNC_TIMEOUT_SECS`: Synchronization timeout (default: 300)
//! - `METAAPI_REQUEST_TIMEOUT_SECS`: Request timeout (default: 60)
//! - `RELAY_SYMBOLS`: Comma-separated allow-list (default: built-in list)
//! - `RELAY_HEARTBEAT_INTERVAL_MS`: SSE heartbeat period (default: 2000)
//! - `RELAY_CLIENT_BUFFER`: Events buffered per SSE client (default: 256)
//! - `RELAY_LATEST_SUBSCRIBES`: `/latest` subscribes upstream (default: false)
//! - `RELAY_REFRESH_POLICY`: off | cache | broadcast (default: off)
//! - `RELAY_REFRESH_INTERVAL_MS`: Refresh period (default: 1000)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: price-stream-relay)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use price_stream_relay::application::services::{SubscriptionService, TickRelay};
use price_stream_relay::domain::cache::TickCache;
use price_stream_relay::infrastructure::broadcast::Broadcaster;
use price_stream_relay::infrastructure::health::HealthState;
use price_stream_relay::infrastructure::http::{self, AppState, RelayServer};
use price_stream_relay::infrastructure::metaapi::{FeedState, MetaApiClient, MetaApiClientConfig};
use price_stream_relay::infrastructure::telemetry;
use price_stream_relay::{RelayConfig, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Price Stream Relay");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = RelayConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Cache and fan-out
    let cache = Arc::new(TickCache::new());
    let broadcaster = Arc::new(Broadcaster::new(config.stream.client_buffer));
    let relay = Arc::new(TickRelay::new(Arc::clone(&cache), broadcaster.clone()));

    // Upstream connection; failure here is fatal
    let feed_state = Arc::new(FeedState::new());
    let client = MetaApiClient::connect(
        MetaApiClientConfig::from_relay(&config),
        relay.clone(),
        Arc::clone(&feed_state),
        shutdown_token.clone(),
    )
    .await
    .context("failed to connect to MetaApi")?;

    let subscriptions = Arc::new(SubscriptionService::new(client));

    // Periodic cache refresh
    tokio::spawn(Arc::clone(&relay).run_refresh(
        config.refresh.policy,
        config.refresh.interval,
        shutdown_token.clone(),
    ));

    // HTTP server
    let app_state = Arc::new(AppState {
        symbols: config.symbols.clone(),
        cache: Arc::clone(&cache),
        broadcaster: Arc::clone(&broadcaster),
        subscriptions: Arc::clone(&subscriptions),
        heartbeat_interval: config.stream.heartbeat_interval,
        latest_subscribes: config.stream.latest_subscribes,
        shutdown: shutdown_token.clone(),
    });
    let health_state = Arc::new(HealthState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        feed_state,
        broadcaster,
        subscriptions,
        cache,
    ));
    let server = RelayServer::new(
        config.server.port,
        http::router(app_state, health_state),
        shutdown_token.clone(),
    );

    let server_shutdown = shutdown_token.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!(error = %e, "HTTP server error");
            server_shutdown.cancel();
        }
    });

    tracing::info!("Price relay ready");

    tokio::select! {
        () = await_shutdown() => {}
        () = shutdown_token.cancelled() => {}
    }
    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, server_handle)
        .await
        .is_err()
    {
        tracing::warn!("HTTP server did not stop in time");
    }

    tracing::info!("Price relay stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        port = config.server.port,
        account_id = %config.credentials.account_id(),
        region = %config.upstream.region,
        symbols = config.symbols.len(),
        refresh_policy = config.refresh.policy.as_str(),
        latest_subscribes = config.stream.latest_subscribes,
        "Configuration loaded"
    );
    tracing::debug!(
        heartbeat_ms = config.stream.heartbeat_interval.as_millis(),
        client_buffer = config.stream.client_buffer,
        tick_interval_ms = config.upstream.tick_interval.as_millis(),
        "Stream settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
