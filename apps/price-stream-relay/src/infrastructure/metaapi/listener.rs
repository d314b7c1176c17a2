//! Price Listener
//!
//! Normalizes the two shapes MetaApi uses for price updates (one tick, or a
//! batch) into one [`TickSink::on_tick`] call per tick.

use std::sync::Arc;

use serde_json::Value;

use super::state::FeedState;
use crate::application::ports::TickSink;
use crate::domain::market::PriceTick;
use crate::infrastructure::metrics;

/// A price update as received from the upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum PriceUpdate {
    /// One tick.
    Single(Value),
    /// Several ticks, in delivery order.
    Batch(Vec<Value>),
}

/// Feeds upstream price updates into a [`TickSink`].
pub struct PriceListener {
    sink: Arc<dyn TickSink>,
    state: Arc<FeedState>,
}

impl PriceListener {
    /// Create a listener forwarding to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn TickSink>, state: Arc<FeedState>) -> Self {
        Self { sink, state }
    }

    /// Forward every valid tick in `update`.
    ///
    /// Ticks without a string `symbol` are discarded. Returns the number of
    /// ticks forwarded.
    pub fn on_update(&self, update: PriceUpdate) -> usize {
        match update {
            PriceUpdate::Single(raw) => usize::from(self.forward(raw)),
            PriceUpdate::Batch(batch) => batch
                .into_iter()
                .map(|raw| self.forward(raw))
                .filter(|forwarded| *forwarded)
                .count(),
        }
    }

    fn forward(&self, raw: Value) -> bool {
        self.state.increment_ticks_received();

        let Some(tick) = PriceTick::from_value(raw) else {
            self.state.increment_ticks_discarded();
            metrics::record_tick_discarded();
            tracing::debug!("Discarding tick without symbol");
            return false;
        };

        self.sink.on_tick(tick);
        true
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        ticks: Mutex<Vec<PriceTick>>,
    }

    impl TickSink for RecordingSink {
        fn on_tick(&self, tick: PriceTick) {
            self.ticks.lock().push(tick);
        }
    }

    fn listener() -> (PriceListener, Arc<RecordingSink>, Arc<FeedState>) {
        let sink = Arc::new(RecordingSink::default());
        let state = Arc::new(FeedState::new());
        (
            PriceListener::new(sink.clone(), state.clone()),
            sink,
            state,
        )
    }

    #[test]
    fn single_update_forwards_one_tick() {
        let (listener, sink, _) = listener();

        let forwarded =
            listener.on_update(PriceUpdate::Single(json!({"symbol": "EURUSD.a", "bid": 1.1})));

        assert_eq!(forwarded, 1);
        let ticks = sink.ticks.lock();
        assert_eq!(ticks[0].symbol().as_str(), "EURUSD.a");
        assert_eq!(ticks[0].raw()["bid"], 1.1);
    }

    #[test]
    fn batch_is_forwarded_in_order() {
        let (listener, sink, _) = listener();

        listener.on_update(PriceUpdate::Batch(vec![
            json!({"symbol": "EURUSD.a", "bid": 1.1}),
            json!({"symbol": "GBPUSD.a", "bid": 1.3}),
            json!({"symbol": "EURUSD.a", "bid": 1.2}),
        ]));

        let symbols: Vec<_> = sink
            .ticks
            .lock()
            .iter()
            .map(|t| t.raw()["bid"].as_f64().unwrap())
            .collect();
        assert_eq!(symbols, vec![1.1, 1.3, 1.2]);
    }

    #[test]
    fn ticks_without_symbol_are_discarded() {
        let (listener, sink, state) = listener();

        let forwarded = listener.on_update(PriceUpdate::Batch(vec![
            json!({"bid": 1.1}),
            json!({"symbol": 42}),
            json!({"symbol": "XAUUSD.a", "bid": 2000.5}),
            Value::Null,
        ]));

        assert_eq!(forwarded, 1);
        assert_eq!(sink.ticks.lock().len(), 1);
        assert_eq!(state.get_ticks_received(), 4);
        assert_eq!(state.get_ticks_discarded(), 3);
    }

    #[test]
    fn empty_batch_is_noop() {
        let (listener, sink, _) = listener();
        assert_eq!(listener.on_update(PriceUpdate::Batch(Vec::new())), 0);
        assert!(sink.ticks.lock().is_empty());
    }
}
