//! MetaApi Adapter
//!
//! WebSocket client for the MetaApi streaming API. Implements the
//! [`MarketDataPort`](crate::application::ports::MarketDataPort) and feeds
//! normalized ticks into a [`TickSink`](crate::application::ports::TickSink).

mod client;
mod listener;
pub mod messages;
mod state;

pub use client::{MetaApiClient, MetaApiClientConfig, MetaApiError};
pub use listener::{PriceListener, PriceUpdate};
pub use state::{ConnectionState, FeedState};
