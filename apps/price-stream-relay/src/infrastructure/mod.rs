//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Fan-out of cache updates to SSE connections.
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// Health check and metrics endpoints.
pub mod health;

/// SSE stream and snapshot endpoints.
pub mod http;

/// MetaApi WebSocket client adapter.
pub mod metaapi;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
