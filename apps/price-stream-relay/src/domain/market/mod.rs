//! Market Data Types
//!
//! Core domain types for relayed prices. Upstream ticks are opaque JSON
//! objects; the relay only needs their `symbol` field to route them and
//! otherwise forwards them byte-for-byte as received.

use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::Value;

// =============================================================================
// Symbols
// =============================================================================

/// Unix epoch milliseconds.
pub type Timestamp = i64;

/// An instrument identifier in the broker's canonical spelling.
///
/// Brokers often use mixed-case suffixes (`EURUSD.a`), while clients request
/// symbols in whatever case they like. Routing therefore uses [`SymbolKey`],
/// and the canonical spelling is kept for upstream calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol(String);

impl Symbol {
    /// Create a symbol from its canonical spelling.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The canonical spelling.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The case-insensitive routing key for this symbol.
    #[must_use]
    pub fn key(&self) -> SymbolKey {
        SymbolKey::from_requested(&self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Symbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Upper-cased symbol used for cache, subscription and fan-out lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolKey(String);

impl SymbolKey {
    /// Normalize a requested symbol (e.g. a URL path segment).
    #[must_use]
    pub fn from_requested(requested: &str) -> Self {
        Self(requested.trim().to_uppercase())
    }

    /// The normalized key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Price Tick
// =============================================================================

/// A single price update as delivered by the upstream feed.
///
/// Only ticks carrying a non-empty string `symbol` can be constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTick {
    symbol: Symbol,
    raw: Value,
}

impl PriceTick {
    /// Wrap an upstream payload, rejecting it if it has no usable symbol.
    #[must_use]
    pub fn from_value(raw: Value) -> Option<Self> {
        let symbol = raw
            .get("symbol")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())?
            .to_string();

        Some(Self {
            symbol: Symbol(symbol),
            raw,
        })
    }

    /// Symbol named by the tick itself.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Routing key for the tick's symbol.
    #[must_use]
    pub fn key(&self) -> SymbolKey {
        self.symbol.key()
    }

    /// The untouched upstream payload.
    #[must_use]
    pub const fn raw(&self) -> &Value {
        &self.raw
    }
}

impl Serialize for PriceTick {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

/// The latest tick for a symbol, stamped with the time it was stored.
///
/// Serializes as `{"timestamp": <ms>, "price": <tick>}`, which is both the
/// `price` SSE payload and the `/latest` response body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    /// When the relay stored (or last refreshed) the tick.
    pub timestamp: Timestamp,
    /// The tick as received.
    pub price: PriceTick,
}

impl CacheEntry {
    /// Routing key of the wrapped tick.
    #[must_use]
    pub fn key(&self) -> SymbolKey {
        self.price.key()
    }
}

// =============================================================================
// Tests
// =============================================================================
