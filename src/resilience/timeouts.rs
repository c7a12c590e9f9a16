//! Timeout enforcement.
//!
//! Every call that leaves the process (counter store, backend attempt,
//! health probe) runs under a deadline from this module.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// The wrapped operation did not finish in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation timed out after {0:?}")]
pub struct TimedOut(pub Duration);

/// Run `fut` with a deadline of `limit`.
pub async fn with_timeout<F, T>(limit: Duration, fut: F) -> Result<T, TimedOut>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TimedOut(limit))
}
