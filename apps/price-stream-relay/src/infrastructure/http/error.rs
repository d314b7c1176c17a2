//! HTTP API Errors

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::application::ports::MarketDataError;

/// Errors returned to HTTP clients.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The symbol is not on the allow-list.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// The upstream refused or failed the subscription.
    #[error("upstream subscription failed: {0}")]
    Upstream(#[from] MarketDataError),
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::UnknownSymbol(_) => StatusCode::BAD_REQUEST,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Message exposed in the response body.
    #[must_use]
    pub const fn public_message(&self) -> &'static str {
        match self {
            Self::UnknownSymbol(_) => "Unknown symbol",
            Self::Upstream(_) => "Upstream subscription failed",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.public_message() }))).into_response()
    }
}
