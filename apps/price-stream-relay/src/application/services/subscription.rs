//! Subscription Service
//!
//! Lazily drives upstream subscriptions: the first client interested in a
//! symbol triggers the upstream subscribe call, every later client finds the
//! symbol already marked.
//!
//! Concurrent first requests for the same symbol are serialized by a
//! per-symbol gate, so the upstream sees a single subscribe per symbol. A
//! failed subscribe leaves the symbol unmarked and the next caller retries.

use std::collections::HashMap;
use std::sync::Arc;

use crate::application::ports::{MarketDataError, MarketDataPort};
use crate::domain::market::{Symbol, SymbolKey};
use crate::domain::subscription::SubscriptionSet;
use crate::infrastructure::metrics;

/// Result of [`SubscriptionService::ensure_subscribed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// The symbol was already subscribed; nothing was sent upstream.
    AlreadySubscribed,
    /// This call issued the upstream subscription.
    Subscribed,
}

/// Ensures symbols are subscribed upstream at most once.
pub struct SubscriptionService {
    upstream: Arc<dyn MarketDataPort>,
    subscribed: SubscriptionSet,
    gates: parking_lot::Mutex<HashMap<SymbolKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl SubscriptionService {
    /// Create a service issuing subscriptions through `upstream`.
    #[must_use]
    pub fn new(upstream: Arc<dyn MarketDataPort>) -> Self {
        Self {
            upstream,
            subscribed: SubscriptionSet::new(),
            gates: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe `symbol` upstream unless it already is.
    ///
    /// # Errors
    ///
    /// Returns the upstream error if the subscribe call fails. The symbol is
    /// not marked in that case.
    pub async fn ensure_subscribed(
        &self,
        symbol: &Symbol,
    ) -> Result<SubscribeOutcome, MarketDataError> {
        let key = symbol.key();
        if self.subscribed.contains(&key) {
            return Ok(SubscribeOutcome::AlreadySubscribed);
        }

        let gate = Arc::clone(self.gates.lock().entry(key.clone()).or_default());
        let _permit = gate.lock().await;

        // Another caller may have finished while we waited on the gate
        if self.subscribed.contains(&key) {
            return Ok(SubscribeOutcome::AlreadySubscribed);
        }

        tracing::debug!(symbol = %symbol, "Subscribing upstream");
        if let Err(e) = self.upstream.subscribe(symbol).await {
            metrics::record_subscribe_error();
            tracing::warn!(symbol = %symbol, error = %e, "Upstream subscribe failed");
            return Err(e);
        }

        self.subscribed.insert(symbol);
        metrics::set_upstream_subscriptions(self.subscribed.len());
        tracing::info!(symbol = %symbol, "Subscribed to upstream market data");

        Ok(SubscribeOutcome::Subscribed)
    }

    /// Whether the symbol is subscribed upstream.
    #[must_use]
    pub fn is_subscribed(&self, key: &SymbolKey) -> bool {
        self.subscribed.contains(key)
    }

    /// Symbols subscribed upstream.
    #[must_use]
    pub fn subscribed_symbols(&self) -> Vec<Symbol> {
        self.subscribed.symbols()
    }

    /// Number of symbols subscribed upstream.
    #[must_use]
    pub fn subscribed_count(&self) -> usize {
        self.subscribed.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
