//! MetaApi Streaming Client
//!
//! Holds the single WebSocket connection to MetaApi for the whole process.
//!
//! # Lifecycle
//!
//! 1. Open the WebSocket (bounded by the connect timeout).
//! 2. On `authenticated`, request terminal synchronization.
//! 3. Once both order and deal synchronization have finished, the feed is
//!    connected and price packets start flowing to the [`PriceListener`].
//! 4. `subscribeToMarketData` requests are correlated with their
//!    `response`/`processingError` packets by request id.
//!
//! If the connection drops later, the feed state becomes disconnected and
//! pending requests fail. There is no reconnect.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::listener::{PriceListener, PriceUpdate};
use super::messages::{ClientRequest, MarketDataSubscription, ServerPacket, rejection_reason};
use super::state::{ConnectionState, FeedState};
use crate::application::ports::{MarketDataError, MarketDataPort, TickSink};
use crate::domain::market::Symbol;
use crate::infrastructure::config::RelayConfig;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur while establishing the upstream connection.
#[derive(Debug, thiserror::Error)]
pub enum MetaApiError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A connection phase did not complete in time.
    #[error("{phase} did not complete within {timeout:?}")]
    Timeout {
        /// Phase that timed out.
        phase: &'static str,
        /// Time allowed.
        timeout: Duration,
    },

    /// The server closed the connection before synchronization finished.
    #[error("connection closed before synchronization")]
    ConnectionClosed,

    /// Startup was cancelled.
    #[error("connection cancelled")]
    Cancelled,
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration for the MetaApi client.
#[derive(Clone)]
pub struct MetaApiClientConfig {
    /// WebSocket URL including the auth token.
    pub url: String,
    /// Trading account id.
    pub account_id: String,
    /// Tick throttle requested per subscription.
    pub tick_interval: Duration,
    /// WebSocket connect timeout.
    pub connect_timeout: Duration,
    /// Synchronization timeout.
    pub sync_timeout: Duration,
    /// Request acknowledgement timeout.
    pub request_timeout: Duration,
}

impl MetaApiClientConfig {
    /// Build the client configuration from the relay configuration.
    #[must_use]
    pub fn from_relay(config: &RelayConfig) -> Self {
        Self {
            url: config.upstream_url(),
            account_id: config.credentials.account_id().to_string(),
            tick_interval: config.upstream.tick_interval,
            connect_timeout: config.upstream.connect_timeout,
            sync_timeout: config.upstream.sync_timeout,
            request_timeout: config.upstream.request_timeout,
        }
    }
}

impl std::fmt::Debug for MetaApiClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaApiClientConfig")
            .field("url", &"[REDACTED]")
            .field("account_id", &self.account_id)
            .field("tick_interval", &self.tick_interval)
            .field("connect_timeout", &self.connect_timeout)
            .field("sync_timeout", &self.sync_timeout)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

// =============================================================================
// Session
// =============================================================================

type PendingReply = oneshot::Sender<Result<(), String>>;

/// State shared between the client handle and its connection tasks.
struct Session {
    account_id: String,
    outbound: mpsc::Sender<String>,
    pending: parking_lot::Mutex<HashMap<String, PendingReply>>,
    state: Arc<FeedState>,
}

impl Session {
    async fn send(&self, request: &ClientRequest) -> Result<(), MarketDataError> {
        let text = request
            .encode()
            .map_err(|e| MarketDataError::Transport(e.to_string()))?;
        self.outbound
            .send(text)
            .await
            .map_err(|_| MarketDataError::NotConnected)
    }

    fn synchronize_request(&self) -> ClientRequest {
        ClientRequest::Synchronize {
            account_id: self.account_id.clone(),
            request_id: Uuid::new_v4().to_string(),
            instance_index: 0,
        }
    }

    fn resolve(&self, request_id: &str, outcome: Result<(), String>) {
        let reply = self.pending.lock().remove(request_id);
        match reply {
            Some(reply) => {
                let _ = reply.send(outcome);
            }
            None => tracing::trace!(request_id, "No pending request for reply"),
        }
    }

    fn fail_pending(&self) {
        let pending = std::mem::take(&mut *self.pending.lock());
        if !pending.is_empty() {
            tracing::warn!(count = pending.len(), "Failing pending upstream requests");
        }
        // Dropping the senders wakes every waiter with a closed channel
        drop(pending);
    }
}

// =============================================================================
// MetaApi Client
// =============================================================================

/// Streaming connection to MetaApi.
pub struct MetaApiClient {
    config: MetaApiClientConfig,
    session: Arc<Session>,
}

impl MetaApiClient {
    /// Connect, synchronize and start delivering prices to `sink`.
    ///
    /// Returns once the terminal is synchronized. Background tasks keep the
    /// connection running until `cancel` fires or the server disconnects.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be opened or does not
    /// synchronize in time.
    pub async fn connect(
        config: MetaApiClientConfig,
        sink: Arc<dyn TickSink>,
        state: Arc<FeedState>,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>, MetaApiError> {
        state.set_state(ConnectionState::Connecting);
        tracing::info!(account_id = %config.account_id, "Connecting to MetaApi stream");

        let connected = tokio::select! {
            () = cancel.cancelled() => return Err(MetaApiError::Cancelled),
            result = tokio::time::timeout(
                config.connect_timeout,
                tokio_tungstenite::connect_async(config.url.as_str()),
            ) => result,
        };
        let (ws_stream, _response) = match connected {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => {
                state.set_error(e.to_string());
                return Err(e.into());
            }
            Err(_) => {
                let err = MetaApiError::Timeout {
                    phase: "connect",
                    timeout: config.connect_timeout,
                };
                state.set_error(err.to_string());
                return Err(err);
            }
        };

        state.set_state(ConnectionState::Synchronizing);
        let (write, read) = ws_stream.split();

        let (outbound_tx, outbound_rx) = mpsc::channel::<String>(64);
        let (synced_tx, mut synced_rx) = watch::channel(false);
        let connection_cancel = cancel.child_token();

        let session = Arc::new(Session {
            account_id: config.account_id.clone(),
            outbound: outbound_tx,
            pending: parking_lot::Mutex::new(HashMap::new()),
            state: Arc::clone(&state),
        });

        tokio::spawn(run_writer(write, outbound_rx, connection_cancel.clone()));
        tokio::spawn(run_reader(
            read,
            Arc::clone(&session),
            PriceListener::new(sink, Arc::clone(&state)),
            synced_tx,
            connection_cancel.clone(),
        ));

        let synchronized = tokio::select! {
            () = cancel.cancelled() => return Err(MetaApiError::Cancelled),
            result = tokio::time::timeout(
                config.sync_timeout,
                synced_rx.wait_for(|synced| *synced),
            ) => result.map(|waited| waited.is_ok()),
        };
        match synchronized {
            Ok(true) => {}
            Ok(false) => {
                state.set_error("connection closed before synchronization".to_string());
                connection_cancel.cancel();
                return Err(MetaApiError::ConnectionClosed);
            }
            Err(_) => {
                let err = MetaApiError::Timeout {
                    phase: "synchronization",
                    timeout: config.sync_timeout,
                };
                state.set_error(err.to_string());
                connection_cancel.cancel();
                return Err(err);
            }
        }

        tracing::info!(account_id = %config.account_id, "MetaApi stream synchronized");
        Ok(Arc::new(Self { config, session }))
    }

    /// Shared connection state.
    #[must_use]
    pub fn state(&self) -> Arc<FeedState> {
        Arc::clone(&self.session.state)
    }
}

#[async_trait]
impl MarketDataPort for MetaApiClient {
    async fn subscribe(&self, symbol: &Symbol) -> Result<(), MarketDataError> {
        if !self.session.state.is_connected() {
            return Err(MarketDataError::NotConnected);
        }

        let request_id = Uuid::new_v4().to_string();
        let interval_ms = u64::try_from(self.config.tick_interval.as_millis()).unwrap_or(u64::MAX);
        let request = ClientRequest::SubscribeToMarketData {
            account_id: self.config.account_id.clone(),
            request_id: request_id.clone(),
            symbol: symbol.as_str().to_string(),
            subscriptions: vec![MarketDataSubscription::ticks(interval_ms)],
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        self.session
            .pending
            .lock()
            .insert(request_id.clone(), reply_tx);

        if let Err(e) = self.session.send(&request).await {
            self.session.pending.lock().remove(&request_id);
            return Err(e);
        }
        tracing::debug!(symbol = %symbol, request_id = %request_id, "Sent market data subscription");

        match tokio::time::timeout(self.config.request_timeout, reply_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(message))) => Err(MarketDataError::Rejected {
                symbol: symbol.to_string(),
                message,
            }),
            Ok(Err(_)) => Err(MarketDataError::NotConnected),
            Err(_) => {
                self.session.pending.lock().remove(&request_id);
                Err(MarketDataError::Timeout(self.config.request_timeout))
            }
        }
    }
}

// =============================================================================
// Connection Tasks
// =============================================================================

async fn run_writer<W>(mut write: W, mut outbound: mpsc::Receiver<String>, cancel: CancellationToken)
where
    W: SinkExt<Message> + Unpin,
    W::Error: std::fmt::Display,
{
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            text = outbound.recv() => {
                let Some(text) = text else { break };
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    tracing::warn!(error = %e, "Failed to send upstream request");
                    cancel.cancel();
                    break;
                }
            }
        }
    }
    tracing::debug!("MetaApi writer stopped");
}

/// Progress of terminal state synchronization.
#[derive(Debug, Default)]
struct SyncProgress {
    orders: bool,
    deals: bool,
}

impl SyncProgress {
    const fn is_complete(&self) -> bool {
        self.orders && self.deals
    }
}

async fn run_reader<R>(
    mut read: R,
    session: Arc<Session>,
    listener: PriceListener,
    synced: watch::Sender<bool>,
    cancel: CancellationToken,
) where
    R: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let mut progress = SyncProgress::default();

    loop {
        let msg = tokio::select! {
            () = cancel.cancelled() => break,
            msg = read.next() => msg,
        };

        match msg {
            Some(Ok(Message::Text(text))) => {
                handle_text(&text, &session, &listener, &synced, &mut progress).await;
            }
            Some(Ok(Message::Close(_))) => {
                tracing::warn!("MetaApi server sent close frame");
                break;
            }
            Some(Ok(_)) => {
                // Ping/pong handled by tungstenite
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "MetaApi connection error");
                break;
            }
            None => {
                tracing::warn!("MetaApi stream ended");
                break;
            }
        }
    }

    cancel.cancel();
    if session.state.get_state() != ConnectionState::Error {
        session.state.set_state(ConnectionState::Disconnected);
    }
    session.fail_pending();
    tracing::info!("MetaApi reader stopped");
}

async fn handle_text(
    text: &str,
    session: &Session,
    listener: &PriceListener,
    synced: &watch::Sender<bool>,
    progress: &mut SyncProgress,
) {
    let packet = match ServerPacket::decode(text) {
        Ok(packet) => packet,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring undecodable upstream packet");
            return;
        }
    };

    match packet {
        ServerPacket::Authenticated => {
            tracing::debug!("MetaApi terminal authenticated, synchronizing");
            if let Err(e) = session.send(&session.synchronize_request()).await {
                tracing::warn!(error = %e, "Failed to request synchronization");
            }
        }
        ServerPacket::SynchronizationStarted { synchronization_id } => {
            tracing::debug!(?synchronization_id, "Synchronization started");
            *progress = SyncProgress::default();
            if !*synced.borrow() {
                session.state.set_state(ConnectionState::Synchronizing);
            }
        }
        ServerPacket::OrderSynchronizationFinished => {
            progress.orders = true;
            mark_synced_if_complete(session, synced, progress);
        }
        ServerPacket::DealSynchronizationFinished => {
            progress.deals = true;
            mark_synced_if_complete(session, synced, progress);
        }
        ServerPacket::Price { price } => {
            if *synced.borrow() {
                listener.on_update(PriceUpdate::Single(price));
            }
        }
        ServerPacket::Prices { prices } => {
            if *synced.borrow() {
                listener.on_update(PriceUpdate::Batch(prices));
            }
        }
        ServerPacket::Response { request_id } => {
            session.resolve(&request_id, Ok(()));
        }
        ServerPacket::ProcessingError {
            request_id,
            error,
            message,
        } => {
            let reason = rejection_reason(error.as_deref(), message.as_deref());
            match request_id {
                Some(request_id) => session.resolve(&request_id, Err(reason)),
                None => tracing::warn!(reason = %reason, "Upstream processing error"),
            }
        }
        ServerPacket::Disconnected => {
            tracing::warn!("MetaApi terminal disconnected from broker");
        }
        ServerPacket::Unknown => {
            tracing::trace!("Ignoring unhandled packet type");
        }
    }
}

fn mark_synced_if_complete(session: &Session, synced: &watch::Sender<bool>, progress: &SyncProgress) {
    if progress.is_complete() && !*synced.borrow() {
        session.state.set_state(ConnectionState::Connected);
        synced.send_replace(true);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use tokio::net::TcpListener;

    use super::*;
    use crate::domain::market::PriceTick;

    #[derive(Default)]
    struct RecordingSink {
        ticks: Mutex<Vec<PriceTick>>,
    }

    impl TickSink for RecordingSink {
        fn on_tick(&self, tick: PriceTick) {
            self.ticks.lock().push(tick);
        }
    }

    fn config(url: String) -> MetaApiClientConfig {
        MetaApiClientConfig {
            url,
            account_id: "acc-1".to_string(),
            tick_interval: Duration::from_millis(250),
            connect_timeout: Duration::from_secs(2),
            sync_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_millis(500),
        }
    }

    /// How the fake server answers subscribe requests.
    #[derive(Clone, Copy)]
    enum Reply {
        Accept,
        Reject,
        Ignore,
    }

    /// Fake MetaApi server: authenticates, synchronizes, answers subscribes
    /// and pushes one tick per accepted symbol.
    async fn fake_server(reply: Reply, synchronize: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut write, mut read) = ws.split();

            write
                .send(Message::Text(json!({"type": "authenticated"}).to_string().into()))
                .await
                .unwrap();

            while let Some(Ok(Message::Text(text))) = read.next().await {
                let request: Value = serde_json::from_str(&text).unwrap();
                match request["type"].as_str() {
                    Some("synchronize") if synchronize => {
                        // A price before sync finishes must not be delivered
                        for packet in [
                            json!({"type": "synchronizationStarted", "synchronizationId": "s-1"}),
                            json!({"type": "price", "price": {"symbol": "EARLY.a"}}),
                            json!({"type": "accountInformation", "accountInformation": {}}),
                            json!({"type": "orderSynchronizationFinished"}),
                            json!({"type": "dealSynchronizationFinished"}),
                        ] {
                            write.send(Message::Text(packet.to_string().into())).await.unwrap();
                        }
                    }
                    Some("subscribeToMarketData") => {
                        let request_id = request["requestId"].clone();
                        let symbol = request["symbol"].clone();
                        let packets = match reply {
                            Reply::Accept => vec![
                                json!({"type": "response", "requestId": request_id}),
                                json!({"type": "prices", "prices": [
                                    {"symbol": symbol, "bid": 1.1},
                                    {"bid": 9.9},
                                ]}),
                            ],
                            Reply::Reject => vec![json!({
                                "type": "processingError",
                                "requestId": request_id,
                                "error": "NotFoundError",
                                "message": "Symbol not found",
                            })],
                            Reply::Ignore => Vec::new(),
                        };
                        for packet in packets {
                            write.send(Message::Text(packet.to_string().into())).await.unwrap();
                        }
                    }
                    _ => {}
                }
            }
        });

        format!("ws://{addr}/ws")
    }

    #[tokio::test]
    async fn connect_subscribe_and_receive_ticks() {
        let url = fake_server(Reply::Accept, true).await;
        let sink = Arc::new(RecordingSink::default());
        let state = Arc::new(FeedState::new());

        let client = MetaApiClient::connect(
            config(url),
            sink.clone(),
            state.clone(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(state.is_connected());

        client.subscribe(&Symbol::new("EURUSD.a")).await.unwrap();

        for _ in 0..50 {
            if !sink.ticks.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let ticks = sink.ticks.lock();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].symbol().as_str(), "EURUSD.a");
        assert_eq!(state.get_ticks_discarded(), 1);
    }

    #[tokio::test]
    async fn rejected_subscription() {
        let url = fake_server(Reply::Reject, true).await;
        let client = MetaApiClient::connect(
            config(url),
            Arc::new(RecordingSink::default()),
            Arc::new(FeedState::new()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let err = client.subscribe(&Symbol::new("NOPE.a")).await.unwrap_err();

        let MarketDataError::Rejected { symbol, message } = err else {
            panic!("expected rejection");
        };
        assert_eq!(symbol, "NOPE.a");
        assert_eq!(message, "NotFoundError: Symbol not found");
    }

    #[tokio::test]
    async fn unanswered_subscription_times_out() {
        let url = fake_server(Reply::Ignore, true).await;
        let client = MetaApiClient::connect(
            config(url),
            Arc::new(RecordingSink::default()),
            Arc::new(FeedState::new()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let err = client.subscribe(&Symbol::new("EURUSD.a")).await.unwrap_err();

        assert!(matches!(err, MarketDataError::Timeout(_)));
        assert!(client.session.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn synchronization_timeout_is_fatal() {
        let url = fake_server(Reply::Accept, false).await;
        let state = Arc::new(FeedState::new());
        let mut config = config(url);
        config.sync_timeout = Duration::from_millis(100);

        let err = MetaApiClient::connect(
            config,
            Arc::new(RecordingSink::default()),
            state.clone(),
            CancellationToken::new(),
        )
        .await
        .err()
        .unwrap();

        assert!(matches!(err, MetaApiError::Timeout { phase: "synchronization", .. }));
        assert_eq!(state.get_state(), ConnectionState::Error);
    }

    #[tokio::test]
    async fn unreachable_server_fails() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = MetaApiClient::connect(
            config(format!("ws://{addr}/ws")),
            Arc::new(RecordingSink::default()),
            Arc::new(FeedState::new()),
            CancellationToken::new(),
        )
        .await
        .err()
        .unwrap();

        assert!(matches!(err, MetaApiError::WebSocket(_)));
    }

    #[tokio::test]
    async fn cancellation_disconnects() {
        let url = fake_server(Reply::Accept, true).await;
        let state = Arc::new(FeedState::new());
        let cancel = CancellationToken::new();

        let client = MetaApiClient::connect(
            config(url),
            Arc::new(RecordingSink::default()),
            state.clone(),
            cancel.clone(),
        )
        .await
        .unwrap();

        cancel.cancel();
        for _ in 0..50 {
            if !state.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(state.get_state(), ConnectionState::Disconnected);
        let err = client.subscribe(&Symbol::new("EURUSD.a")).await.unwrap_err();
        assert!(matches!(err, MarketDataError::NotConnected));
    }

    #[test]
    fn config_debug_redacts_url() {
        let config = config("wss://example/ws?auth-token=secret".to_string());
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret"));
    }
}
