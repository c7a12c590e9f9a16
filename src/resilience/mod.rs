//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to a service:
//!     → circuit_breaker.rs (fail fast while the service is known bad)
//!     → timeouts.rs (deadline on every attempt)
//!     → On failure: retries.rs (retryable? attempts left?) + backoff.rs
//!     → circuit_breaker.rs (one outcome per request, per service)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Breakers are per service, not per instance
//! - Retries are bounded so failing requests have a known worst-case latency

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{CircuitBreakerRegistry, CircuitPermit, CircuitState};
pub use retries::RetryPolicy;
pub use timeouts::{with_timeout, TimedOut};
