//! Upstream Feed State
//!
//! Connection state and counters for the MetaApi stream, shared with the
//! health endpoints.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

/// Upstream connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected.
    #[default]
    Disconnected,
    /// Opening the WebSocket.
    Connecting,
    /// Waiting for terminal state synchronization.
    Synchronizing,
    /// Synchronized and delivering prices.
    Connected,
    /// Connection failed.
    Error,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Synchronizing => "synchronizing",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

/// Tracks the state of the upstream feed connection.
#[derive(Debug, Default)]
pub struct FeedState {
    state: parking_lot::RwLock<ConnectionState>,
    last_connected_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    error_message: parking_lot::RwLock<Option<String>>,
    ticks_received: AtomicU64,
    ticks_discarded: AtomicU64,
}

impl FeedState {
    /// Create a state tracker in the disconnected state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection state.
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        if state == ConnectionState::Connected {
            *self.last_connected_at.write() = Some(Utc::now());
            *self.error_message.write() = None;
        }
    }

    /// Set an error state with message.
    pub fn set_error(&self, message: String) {
        *self.state.write() = ConnectionState::Error;
        *self.error_message.write() = Some(message);
    }

    /// Get the current connection state.
    #[must_use]
    pub fn get_state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the feed is synchronized and delivering prices.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.get_state() == ConnectionState::Connected
    }

    /// When the feed last became connected.
    #[must_use]
    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        *self.last_connected_at.read()
    }

    /// Last recorded error.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.error_message.read().clone()
    }

    /// Increment ticks received counter.
    pub fn increment_ticks_received(&self) {
        self.ticks_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment ticks discarded counter.
    pub fn increment_ticks_discarded(&self) {
        self.ticks_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Get ticks received count.
    #[must_use]
    pub fn get_ticks_received(&self) -> u64 {
        self.ticks_received.load(Ordering::Relaxed)
    }

    /// Get ticks discarded count.
    #[must_use]
    pub fn get_ticks_discarded(&self) -> u64 {
        self.ticks_discarded.load(Ordering::Relaxed)
    }
}
