//! Fixed-window rate limiting per (endpoint class, client).
//!
//! Windows are aligned to wall-clock multiples of the window length. A client
//! can spend its burst allowance at the end of one window and again at the
//! start of the next; the burst limit caps how far that overshoots the base
//! limit. In exchange every decision is a single atomic increment in the store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::broadcast;
use tokio::time;

use crate::config::{FailurePolicy, RateLimitConfig};
use crate::observability::metrics;
use crate::resilience::timeouts::{with_timeout, TimedOut};
use crate::security::store::{CounterStore, StoreError};

/// Identifies one counting bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey<'a> {
    pub endpoint_class: &'a str,
    pub client_id: &'a str,
    /// Window start, seconds since the Unix epoch.
    pub window_start: u64,
}

impl RateLimitKey<'_> {
    fn render(&self, prefix: &str) -> String {
        format!(
            "{}:{}:{}:{}",
            prefix, self.endpoint_class, self.client_id, self.window_start
        )
    }
}

/// How a decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    /// Counted in the store.
    Counted,
    /// Store failed; admitted under the fail-open policy.
    FailOpen,
    /// Store failed; rejected under the fail-closed policy.
    FailClosed,
}

/// Admission decision for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Burst limit of the endpoint class.
    pub limit: u64,
    /// Requests left in the current window.
    pub remaining: u64,
    /// Set when denied by the counter: time until the window rolls over.
    pub retry_after: Option<Duration>,
    pub source: DecisionSource,
}

impl RateLimitDecision {
    /// True when the store, not the client's quota, caused the denial.
    pub fn is_store_failure(&self) -> bool {
        self.source == DecisionSource::FailClosed
    }
}

/// Base and burst limit for one endpoint class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassLimit {
    pub base: u64,
    pub burst: u64,
}

impl ClassLimit {
    pub fn new(base: u64, multiplier: f64) -> Self {
        let burst = ((base as f64) * multiplier).floor() as u64;
        Self {
            base,
            burst: burst.max(base),
        }
    }
}

/// Rate limiter backed by a shared counter store.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    classes: HashMap<String, ClassLimit>,
    default_limit: ClassLimit,
    window: Duration,
    failure_policy: FailurePolicy,
    store_timeout: Duration,
    key_prefix: String,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, store: Arc<dyn CounterStore>) -> Self {
        let multiplier = config.burst_multiplier;
        let classes = config
            .classes
            .iter()
            .map(|(class, base)| (class.clone(), ClassLimit::new(*base, multiplier)))
            .collect();

        Self {
            store,
            classes,
            default_limit: ClassLimit::new(config.default_limit, multiplier),
            window: config.window(),
            failure_policy: config.failure_policy,
            store_timeout: config.store_timeout(),
            key_prefix: config.store.key_prefix.clone(),
        }
    }

    /// Limits applied to `endpoint_class`.
    pub fn limit_for(&self, endpoint_class: &str) -> ClassLimit {
        self.classes
            .get(endpoint_class)
            .copied()
            .unwrap_or(self.default_limit)
    }

    /// Deadline for one store call; every check may wait this long.
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Decide whether `client_id` may make another `endpoint_class` request.
    pub async fn check(&self, endpoint_class: &str, client_id: &str) -> RateLimitDecision {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        self.check_at(endpoint_class, client_id, now).await
    }

    /// [`check`](Self::check) against an explicit wall-clock time.
    pub(crate) async fn check_at(
        &self,
        endpoint_class: &str,
        client_id: &str,
        now: Duration,
    ) -> RateLimitDecision {
        let limit = self.limit_for(endpoint_class);
        let window_secs = self.window.as_secs().max(1);
        let window_start = now.as_secs() - now.as_secs() % window_secs;
        let key = RateLimitKey {
            endpoint_class,
            client_id,
            window_start,
        }
        .render(&self.key_prefix);

        let count = match self.increment(&key).await {
            Ok(count) => count,
            Err(err) => return self.store_failure(endpoint_class, limit, err),
        };

        let allowed = count <= limit.burst;
        let remaining = limit.burst.saturating_sub(count);
        let retry_after = if allowed {
            None
        } else {
            let window_end = Duration::from_secs(window_start + window_secs);
            // Never hand out a zero retry-after, even right at the boundary.
            Some(
                window_end
                    .saturating_sub(now)
                    .max(Duration::from_millis(1)),
            )
        };

        if !allowed {
            tracing::debug!(
                class = %endpoint_class,
                client = %client_id,
                count,
                burst_limit = limit.burst,
                "Rate limit exceeded"
            );
            metrics::record_rate_limited(endpoint_class);
        }

        RateLimitDecision {
            allowed,
            limit: limit.burst,
            remaining,
            retry_after,
            source: DecisionSource::Counted,
        }
    }

    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        match with_timeout(self.store_timeout, self.store.increment(key, self.window)).await {
            Ok(result) => result,
            Err(TimedOut(limit)) => Err(StoreError::Timeout(limit)),
        }
    }

    fn store_failure(
        &self,
        endpoint_class: &str,
        limit: ClassLimit,
        err: StoreError,
    ) -> RateLimitDecision {
        tracing::warn!(
            class = %endpoint_class,
            policy = self.failure_policy.as_str(),
            error = %err,
            "Rate counter store failed"
        );
        metrics::record_store_error(self.failure_policy.as_str());

        match self.failure_policy {
            FailurePolicy::FailOpen => RateLimitDecision {
                allowed: true,
                limit: limit.burst,
                remaining: limit.burst,
                retry_after: None,
                source: DecisionSource::FailOpen,
            },
            FailurePolicy::FailClosed => RateLimitDecision {
                allowed: false,
                limit: limit.burst,
                remaining: 0,
                retry_after: None,
                source: DecisionSource::FailClosed,
            },
        }
    }
}

/// Periodically drop expired keys from a store without native TTL.
pub async fn run_sweeper(
    store: Arc<dyn CounterStore>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    if store.native_ttl() {
        return;
    }

    let mut ticker = time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match store.sweep_expired().await {
                    Ok(0) => {}
                    Ok(removed) => tracing::debug!(removed, "Swept expired rate counters"),
                    Err(e) => tracing::warn!(error = %e, "Rate counter sweep failed"),
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Rate counter sweeper received shutdown signal, exiting loop");
                break;
            }
        }
    }
}
