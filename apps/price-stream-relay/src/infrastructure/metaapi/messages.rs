//! MetaApi Streaming Packets
//!
//! JSON packets exchanged with the MetaApi streaming endpoint. Every packet
//! is an object with a `type` discriminator; fields the relay does not use
//! are ignored on decode.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Inbound Packets
// =============================================================================

/// Packets sent by the MetaApi server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerPacket {
    /// The terminal instance accepted the connection.
    Authenticated,

    /// Terminal state synchronization began.
    SynchronizationStarted {
        /// Synchronization id echoed from the request.
        #[serde(rename = "synchronizationId", default)]
        synchronization_id: Option<String>,
    },

    /// Orders are synchronized.
    OrderSynchronizationFinished,

    /// Deal history is synchronized.
    DealSynchronizationFinished,

    /// A single price update.
    Price {
        /// The tick payload.
        #[serde(default)]
        price: Value,
    },

    /// A batch of price updates.
    Prices {
        /// Tick payloads in delivery order.
        #[serde(default)]
        prices: Vec<Value>,
    },

    /// Acknowledgement of a request.
    Response {
        /// Id of the acknowledged request.
        #[serde(rename = "requestId")]
        request_id: String,
    },

    /// Rejection of a request.
    ProcessingError {
        /// Id of the rejected request, if any.
        #[serde(rename = "requestId", default)]
        request_id: Option<String>,
        /// Error class.
        #[serde(default)]
        error: Option<String>,
        /// Human readable reason.
        #[serde(default)]
        message: Option<String>,
    },

    /// The terminal lost its broker connection.
    Disconnected,

    /// Account, position, order, specification and status packets.
    #[serde(other)]
    Unknown,
}

impl ServerPacket {
    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object with a string
    /// `type` field.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Builds a readable reason from a `processingError` packet.
#[must_use]
pub fn rejection_reason(error: Option<&str>, message: Option<&str>) -> String {
    match (error, message) {
        (Some(error), Some(message)) => format!("{error}: {message}"),
        (Some(text), None) | (None, Some(text)) => text.to_string(),
        (None, None) => "request rejected".to_string(),
    }
}

// =============================================================================
// Outbound Requests
// =============================================================================

/// Market data stream requested for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDataSubscription {
    /// Stream type.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Throttle between updates.
    pub interval_in_milliseconds: u64,
}

impl MarketDataSubscription {
    /// Tick stream throttled to `interval_ms`.
    #[must_use]
    pub const fn ticks(interval_ms: u64) -> Self {
        Self {
            kind: "ticks",
            interval_in_milliseconds: interval_ms,
        }
    }
}

/// Requests sent to the MetaApi server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientRequest {
    /// Start terminal state synchronization.
    #[serde(rename_all = "camelCase")]
    Synchronize {
        /// Trading account id.
        account_id: String,
        /// Correlation id.
        request_id: String,
        /// Terminal instance.
        instance_index: u32,
    },

    /// Start streaming market data for a symbol.
    #[serde(rename_all = "camelCase")]
    SubscribeToMarketData {
        /// Trading account id.
        account_id: String,
        /// Correlation id.
        request_id: String,
        /// Symbol in the broker's spelling.
        symbol: String,
        /// Requested streams.
        subscriptions: Vec<MarketDataSubscription>,
    },
}

impl ClientRequest {
    /// Correlation id of this request.
    #[must_use]
    pub fn request_id(&self) -> &str {
        match self {
            Self::Synchronize { request_id, .. } | Self::SubscribeToMarketData { request_id, .. } => {
                request_id
            }
        }
    }

    /// Encode as a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Tests
// =============================================================================
