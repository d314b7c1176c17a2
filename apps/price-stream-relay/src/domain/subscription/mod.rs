//! Subscription Tracking
//!
//! Records which symbols have an active upstream market data subscription.
//!
//! # Design
//!
//! The upstream connection multiplexes every symbol, so a symbol only ever
//! needs one upstream subscription no matter how many clients watch it.
//! The set grows monotonically: symbols are never unsubscribed while the
//! process runs.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::market::{Symbol, SymbolKey};

/// Set of symbols subscribed upstream.
///
/// A symbol must only be inserted after the upstream subscribe call for it
/// returned successfully.
///
/// # Example
///
/// ```rust
/// use price_stream_relay::domain::market::Symbol;
/// use price_stream_relay::domain::subscription::SubscriptionSet;
///
/// let set = SubscriptionSet::new();
/// let eurusd = Symbol::new("EURUSD.a");
///
/// assert!(set.insert(&eurusd));
/// assert!(!set.insert(&eurusd));
/// assert!(set.contains(&eurusd.key()));
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    symbols: RwLock<HashMap<SymbolKey, Symbol>>,
}

impl SubscriptionSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the symbol is subscribed upstream.
    #[must_use]
    pub fn contains(&self, key: &SymbolKey) -> bool {
        self.symbols.read().contains_key(key)
    }

    /// Mark a symbol as subscribed.
    ///
    /// Returns `false` if it was already marked.
    pub fn insert(&self, symbol: &Symbol) -> bool {
        let mut symbols = self.symbols.write();
        if symbols.contains_key(&symbol.key()) {
            return false;
        }
        symbols.insert(symbol.key(), symbol.clone());
        true
    }

    /// Subscribed symbols in canonical spelling, sorted by key.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        let symbols = self.symbols.read();
        let mut keys: Vec<_> = symbols.keys().collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|key| symbols.get(key).cloned())
            .collect()
    }

    /// Number of subscribed symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.read().len()
    }

    /// Whether nothing has been subscribed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.read().is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
