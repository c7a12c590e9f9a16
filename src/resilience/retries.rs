//! Retry policy.
//!
//! # Design Decisions
//! - Transport errors, timeouts and 5xx responses are retryable; 4xx are not
//! - Non-idempotent methods are retried only with an `idempotency-key`
//!   header, unless `retry_non_idempotent` is set
//! - The attempt count is bounded, so the worst-case latency of a failing
//!   request is computable up front

use std::time::Duration;

use axum::http::{HeaderMap, Method, StatusCode};

use crate::config::RetryConfig;
use crate::resilience::backoff::Backoff;

/// Header that marks a request as safe to replay.
pub const IDEMPOTENCY_KEY: &str = "idempotency-key";

/// Whether an upstream status warrants another attempt.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
}

/// Bounded retry policy with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    enabled: bool,
    max_retries: u32,
    retry_non_idempotent: bool,
    backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_retries: config.max_retries,
            retry_non_idempotent: config.retry_non_idempotent,
            backoff: Backoff {
                base_ms: config.base_delay_ms,
                multiplier: config.multiplier,
                max_ms: config.max_delay_ms,
                jitter_ratio: config.jitter_ratio,
            },
        }
    }

    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self::new(&RetryConfig {
            enabled: false,
            ..RetryConfig::default()
        })
    }

    /// Whether a request with this method and headers may be replayed.
    pub fn may_retry(&self, method: &Method, headers: &HeaderMap) -> bool {
        self.enabled
            && (method.is_idempotent()
                || self.retry_non_idempotent
                || headers.contains_key(IDEMPOTENCY_KEY))
    }

    /// Total attempts (first try plus retries) allowed for the request.
    pub fn max_attempts(&self, method: &Method, headers: &HeaderMap) -> u32 {
        if self.may_retry(method, headers) {
            self.max_retries + 1
        } else {
            1
        }
    }

    /// Jittered delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        self.backoff.delay(retry)
    }

    /// Worst-case wall time of a request whose every attempt times out.
    pub fn max_elapsed(&self, attempt_timeout: Duration) -> Duration {
        let attempts = if self.enabled { self.max_retries + 1 } else { 1 };
        let waiting: Duration = (1..attempts).map(|retry| self.backoff.max_delay(retry)).sum();
        attempt_timeout * attempts + waiting
    }
}
