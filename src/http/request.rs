//! Request handling and transformation.
//!
//! # Responsibilities
//! - Name the correlation id header and read it back
//! - Buffer the request body so retries can replay it
//!
//! # Design Decisions
//! - The correlation id is assigned as early as possible (tower-http request-id layer)
//! - Bodies are size-capped before they are read fully

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderName};

use crate::http::response::GatewayError;

/// Header carrying the correlation id in both directions.
pub const CORRELATION_ID: &str = "x-correlation-id";

pub fn correlation_header() -> HeaderName {
    HeaderName::from_static(CORRELATION_ID)
}

/// Correlation id of a request, or `"unknown"` if none was assigned.
pub fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Read the whole body, rejecting anything over `limit` bytes.
pub async fn buffer_body(body: Body, limit: usize) -> Result<Bytes, GatewayError> {
    axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| GatewayError::InvalidRequest(format!("request body rejected: {}", e)))
}
