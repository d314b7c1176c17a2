//! HTTP Edge
//!
//! Binds client requests to the cache, broadcaster and subscription service.

mod error;
mod handlers;
mod server;

pub use error::ApiError;
pub use handlers::{AppState, router};
pub use server::{RelayServer, ServerError, serve};
