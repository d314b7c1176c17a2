//! Domain Layer - Core relay types and state.
//!
//! This layer contains the price tick model and the in-process state the
//! relay keeps about it. Nothing here talks to the network; the only
//! dependencies are serialization and lock primitives.

/// Price tick, symbol and cache entry types.
pub mod market;

/// Latest-tick cache keyed by symbol.
pub mod cache;

/// Upstream subscription bookkeeping.
pub mod subscription;

/// Tradable symbol allow-list.
pub mod symbols;
