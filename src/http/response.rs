//! Response handling and error mapping.
//!
//! # Responsibilities
//! - Map gateway failures to status codes and a JSON error body
//! - Add quota headers to routed responses
//! - Keep internal error details out of client responses
//!
//! # Design Decisions
//! - Backend responses are passed through verbatim, including 5xx after retries
//! - Backend timeouts result in 504 Gateway Timeout
//! - Circuit-open and store-unavailable are 503s with distinct codes

use std::time::Duration;

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::http::request::correlation_header;

pub const RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Gateway-level failures.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("No route matches {0}")]
    RouteNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Service '{0}' is temporarily unavailable (circuit open)")]
    CircuitOpen(String),

    #[error("Rate limit exceeded")]
    RateLimited { limit: u64, retry_after: Duration },

    #[error("Rate limiter unavailable")]
    RateLimiterUnavailable,

    #[error("No healthy instances for service '{0}'")]
    NoHealthyInstances(String),

    #[error("Backend timed out after {0:?}")]
    BackendTimeout(Duration),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::RateLimiterUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::NoHealthyInstances(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::BackendTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::BackendUnavailable(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::RouteNotFound(_) => "route_not_found",
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::CircuitOpen(_) => "circuit_open",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::RateLimiterUnavailable => "rate_limiter_unavailable",
            GatewayError::NoHealthyInstances(_) => "no_healthy_instances",
            GatewayError::BackendTimeout(_) => "backend_timeout",
            GatewayError::BackendUnavailable(_) => "backend_unavailable",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    /// Label used for the `result` metric dimension.
    pub fn result_label(&self) -> &'static str {
        self.code()
    }

    /// Build the client response, tagging it with `correlation_id`.
    pub fn into_response_with(self, correlation_id: &str) -> Response {
        self.build_response(Some(correlation_id))
    }

    fn build_response(self, correlation_id: Option<&str>) -> Response {
        let status = self.status();
        let message = match &self {
            GatewayError::Internal(detail) => {
                tracing::error!(correlation_id = ?correlation_id, detail = %detail, "Internal gateway error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message,
                correlation_id: correlation_id.map(str::to_string),
            },
        });

        let mut response = (status, body).into_response();
        let headers = response.headers_mut();
        if let GatewayError::RateLimited { limit, retry_after } = &self {
            set_quota_headers(headers, *limit, 0);
            headers.insert(
                axum::http::header::RETRY_AFTER,
                HeaderValue::from(retry_after_secs(*retry_after)),
            );
        }
        if let Some(value) = correlation_id.and_then(|id| HeaderValue::from_str(id).ok()) {
            headers.insert(correlation_header(), value);
        }
        response
    }
}

/// Without a correlation id the body omits the field; the request-id layer
/// still sets the header on the way out.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        self.build_response(None)
    }
}

/// Error response format.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Whole seconds for `retry-after`, rounded up and never zero.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

pub fn set_quota_headers(headers: &mut HeaderMap, limit: u64, remaining: u64) {
    headers.insert(RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(RATELIMIT_REMAINING, HeaderValue::from(remaining));
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn rate_limited_carries_retry_after() {
        let response = GatewayError::RateLimited {
            limit: 15,
            retry_after: Duration::from_millis(58_200),
        }
        .into_response_with("corr-1");

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "59");
        assert_eq!(response.headers()[RATELIMIT_LIMIT], "15");
        assert_eq!(response.headers()[RATELIMIT_REMAINING], "0");
        assert_eq!(response.headers()["x-correlation-id"], "corr-1");

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "rate_limited");
        assert_eq!(body["error"]["correlation_id"], "corr-1");
    }

    #[tokio::test]
    async fn circuit_open_is_distinguishable() {
        let circuit = GatewayError::CircuitOpen("campaigns".into()).into_response_with("c");
        let store = GatewayError::RateLimiterUnavailable.into_response_with("c");
        let backend = GatewayError::BackendUnavailable("refused".into()).into_response_with("c");

        assert_eq!(circuit.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(store.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(backend.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_json(circuit).await["error"]["code"], "circuit_open");
        assert_eq!(body_json(store).await["error"]["code"], "rate_limiter_unavailable");
    }

    #[tokio::test]
    async fn internal_errors_hide_details() {
        let response = GatewayError::Internal("db password wrong".into()).into_response_with("c");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"]["message"], "Internal server error");
    }

    #[test]
    fn retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_secs(58)), 58);
        assert_eq!(retry_after_secs(Duration::from_millis(100)), 1);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
    }

    #[test]
    fn timeouts_map_to_504() {
        assert_eq!(
            GatewayError::BackendTimeout(Duration::from_secs(1)).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(GatewayError::RouteNotFound("/x".into()).status(), StatusCode::NOT_FOUND);
    }
}
