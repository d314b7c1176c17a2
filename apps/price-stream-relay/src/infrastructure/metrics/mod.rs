//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Ticks**: Upstream ticks received and discarded
//! - **Events**: SSE events sent to and dropped for clients
//! - **Clients**: Connected SSE clients
//! - **Subscriptions**: Symbols subscribed upstream, subscribe failures
//! - **Latency**: Tick processing latency
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Tick counters
    describe_counter!(
        "price_relay_ticks_received_total",
        "Total ticks received from the upstream feed"
    );
    describe_counter!(
        "price_relay_ticks_discarded_total",
        "Total upstream ticks discarded for lacking a symbol"
    );

    // Event counters
    describe_counter!(
        "price_relay_events_sent_total",
        "Total SSE events queued for clients"
    );
    describe_counter!(
        "price_relay_events_dropped_total",
        "Total SSE events dropped because a client buffer was full"
    );

    // Client gauges
    describe_gauge!(
        "price_relay_sse_clients",
        "Number of connected SSE clients"
    );

    // Subscription gauges
    describe_gauge!(
        "price_relay_upstream_subscriptions",
        "Number of symbols subscribed upstream"
    );
    describe_counter!(
        "price_relay_subscribe_errors_total",
        "Total failed upstream subscribe calls"
    );

    // Latency histograms
    describe_histogram!(
        "price_relay_tick_processing_seconds",
        "Time to cache and fan out a tick"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for SSE event kinds.
#[derive(Debug, Clone, Copy)]
pub enum EventKind {
    /// Price update.
    Price,
    /// Keep-alive heartbeat.
    Heartbeat,
}

impl EventKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Heartbeat => "heartbeat",
        }
    }
}

/// Record a tick received from the upstream feed.
pub fn record_tick_received() {
    counter!("price_relay_ticks_received_total").increment(1);
}

/// Record an upstream tick discarded during normalization.
pub fn record_tick_discarded() {
    counter!("price_relay_ticks_discarded_total").increment(1);
}

/// Record events queued for clients.
pub fn record_events_sent(kind: EventKind, count: u64) {
    counter!(
        "price_relay_events_sent_total",
        "event" => kind.as_str()
    )
    .increment(count);
}

/// Record events dropped for clients with full buffers.
pub fn record_events_dropped(kind: EventKind, count: u64) {
    counter!(
        "price_relay_events_dropped_total",
        "event" => kind.as_str()
    )
    .increment(count);
}

/// Update the connected SSE client count.
#[allow(clippy::cast_precision_loss)]
pub fn set_sse_clients(count: usize) {
    gauge!("price_relay_sse_clients").set(count as f64);
}

/// Update the upstream subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_upstream_subscriptions(count: usize) {
    gauge!("price_relay_upstream_subscriptions").set(count as f64);
}

/// Record a failed upstream subscribe call.
pub fn record_subscribe_error() {
    counter!("price_relay_subscribe_errors_total").increment(1);
}

/// Record tick processing duration.
pub fn record_processing_duration(duration: Duration) {
    histogram!("price_relay_tick_processing_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_as_str() {
        assert_eq!(EventKind::Price.as_str(), "price");
        assert_eq!(EventKind::Heartbeat.as_str(), "heartbeat");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_tick_received();
        record_events_sent(EventKind::Price, 3);
        set_sse_clients(2);
        record_processing_duration(Duration::from_micros(15));
    }
}
