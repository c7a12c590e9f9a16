//! Request dispatch.
//!
//! # Data Flow
//! ```text
//! DispatchRequest
//!     → 1. resolve route (RouteTable)              unknown → 404
//!     → 2. circuit breaker permit (per service)    open → 503, no network call
//!     → 3. rate limit (endpoint class, client)     denied → 429 / store down → 503
//!     → 4. select instance (round robin, healthy)  none → 503, no network call
//!     → 5. forward with per-attempt timeout
//!          transport error / timeout / 5xx → backoff, new instance, retry
//!     → 6. record one outcome on the breaker
//!     → 7. latency and outcome metrics
//! ```
//!
//! # Design Decisions
//! - Stages run in a fixed order inside one function so the order is auditable
//! - Every collaborator is injected; the dispatcher owns no globals
//! - The final backend response is returned verbatim, even a 5xx

pub mod forward;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Response, Uri};
use tracing::Instrument;

use crate::http::response::GatewayError;
use crate::load_balancer::{BackendInstance, BackendManager};
use crate::observability::metrics;
use crate::resilience::retries::is_retryable_status;
use crate::resilience::{with_timeout, CircuitBreakerRegistry, RetryPolicy, TimedOut};
use crate::routing::{ResolvedRoute, RouteInput, RouteTable};
use crate::security::{ClientIdentity, RateLimitDecision, RateLimiter};

pub use forward::{ForwardError, Forwarder, UpstreamClient, UpstreamRequest};

/// An inbound request with its body already buffered.
#[derive(Debug)]
pub struct DispatchRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// `None` when the client could not be identified.
    pub client: Option<ClientIdentity>,
    pub peer: Option<IpAddr>,
    pub correlation_id: String,
}

/// A backend response plus the quota state to report to the client.
#[derive(Debug)]
pub struct Dispatched {
    pub response: Response<Body>,
    pub quota: Option<RateLimitDecision>,
}

/// Runs the ordered stage chain for every routed request.
pub struct Dispatcher {
    routes: Arc<RouteTable>,
    breakers: Arc<CircuitBreakerRegistry>,
    limiter: Option<Arc<RateLimiter>>,
    backends: Arc<BackendManager>,
    forwarder: Arc<dyn Forwarder>,
    retry: RetryPolicy,
    attempt_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        routes: Arc<RouteTable>,
        breakers: Arc<CircuitBreakerRegistry>,
        limiter: Option<Arc<RateLimiter>>,
        backends: Arc<BackendManager>,
        forwarder: Arc<dyn Forwarder>,
        retry: RetryPolicy,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            routes,
            breakers,
            limiter,
            backends,
            forwarder,
            retry,
            attempt_timeout,
        }
    }

    /// Worst-case time a failing request can spend in [`route`](Self::route):
    /// one quota check plus every forwarding attempt and backoff.
    pub fn max_elapsed(&self) -> Duration {
        let quota = self
            .limiter
            .as_ref()
            .map_or(Duration::ZERO, |limiter| limiter.store_timeout());
        quota + self.retry.max_elapsed(self.attempt_timeout)
    }

    pub async fn route(&self, request: DispatchRequest) -> Result<Dispatched, GatewayError> {
        let start = Instant::now();

        // Stage 1: resolve the logical service.
        let route = match self
            .routes
            .resolve(&RouteInput::from_parts(&request.uri, &request.headers))
        {
            Some(route) => route,
            None => {
                tracing::debug!(
                    correlation_id = %request.correlation_id,
                    path = %request.uri.path(),
                    "No route matched"
                );
                let err = GatewayError::RouteNotFound(request.uri.path().to_string());
                metrics::record_request("none", err.result_label(), err.status().as_u16(), start);
                return Err(err);
            }
        };

        let span = tracing::info_span!(
            "dispatch",
            correlation_id = %request.correlation_id,
            service = %route.service,
            method = %request.method,
            path = %request.uri.path()
        );
        let outcome = self.run_stages(&route, request).instrument(span).await;

        // Stage 7: telemetry.
        match &outcome {
            Ok(dispatched) => {
                let status = dispatched.response.status();
                let result = if status.is_server_error() {
                    "backend_error"
                } else {
                    "success"
                };
                metrics::record_request(&route.service, result, status.as_u16(), start);
            }
            Err(err) => {
                metrics::record_request(
                    &route.service,
                    err.result_label(),
                    err.status().as_u16(),
                    start,
                );
            }
        }
        outcome
    }

    async fn run_stages(
        &self,
        route: &ResolvedRoute,
        request: DispatchRequest,
    ) -> Result<Dispatched, GatewayError> {
        let client = request.client.clone().ok_or_else(|| {
            GatewayError::InvalidRequest("client credentials could not be read".into())
        })?;

        // Stage 2: fail fast on a known-bad service before spending quota.
        let permit = match self.breakers.acquire(&route.service) {
            Some(permit) => permit,
            None => {
                tracing::debug!("Circuit open, rejecting without backend call");
                return Err(GatewayError::CircuitOpen(route.service.clone()));
            }
        };
        if permit.is_trial() {
            tracing::info!("Sending half-open trial request");
        }

        // Stage 3: quota.
        let quota = match &self.limiter {
            Some(limiter) => {
                let decision = limiter.check(&route.endpoint_class, &client.key()).await;
                if !decision.allowed {
                    return Err(if decision.is_store_failure() {
                        GatewayError::RateLimiterUnavailable
                    } else {
                        GatewayError::RateLimited {
                            limit: decision.limit,
                            retry_after: decision.retry_after.unwrap_or(Duration::from_secs(1)),
                        }
                    });
                }
                Some(decision)
            }
            None => None,
        };

        // Stages 4 and 5: select and forward, retrying on failure.
        let max_attempts = self.retry.max_attempts(&request.method, &request.headers);
        let path = route.upstream_path(request.uri.path());
        let path_and_query = match request.uri.query() {
            Some(query) => format!("{}?{}", path, query),
            None => path.into_owned(),
        };
        let upstream = UpstreamRequest {
            method: request.method,
            path_and_query,
            headers: request.headers,
            body: request.body,
            correlation_id: request.correlation_id,
            peer: request.peer,
        };
        let result = self
            .forward_with_retries(&route.service, &upstream, max_attempts)
            .await;

        // Stage 6: one outcome per request. Failures that never reached a
        // backend drop the permit unrecorded.
        match breaker_outcome(&result) {
            Some(success) => permit.record(success),
            None => drop(permit),
        }

        result.map(|response| Dispatched { response, quota })
    }

    async fn forward_with_retries(
        &self,
        service: &str,
        upstream: &UpstreamRequest,
        max_attempts: u32,
    ) -> Result<Response<Body>, GatewayError> {
        let mut tried: Vec<Arc<BackendInstance>> = Vec::new();
        let mut last: Option<Result<Response<Body>, GatewayError>> = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.retry.backoff(attempt - 1);
                tracing::info!(attempt, delay = ?delay, "Retrying request");
                metrics::record_retry(service);
                tokio::time::sleep(delay).await;
            }

            let instance = match self.backends.select(service, &tried) {
                Some(instance) => instance,
                None => {
                    tracing::warn!(attempt, "No healthy instances");
                    return last.unwrap_or_else(|| {
                        Err(GatewayError::NoHealthyInstances(service.to_string()))
                    });
                }
            };

            let result = self.attempt(&instance, upstream).await;
            tried.push(instance);

            let retryable = match &result {
                Ok(response) => is_retryable_status(response.status()),
                Err(err) => is_retryable_error(err),
            };
            if !retryable {
                return result;
            }
            last = Some(result);
        }

        last.unwrap_or_else(|| Err(GatewayError::NoHealthyInstances(service.to_string())))
    }

    async fn attempt(
        &self,
        instance: &BackendInstance,
        upstream: &UpstreamRequest,
    ) -> Result<Response<Body>, GatewayError> {
        let request = upstream
            .build_for(instance)
            .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;

        match with_timeout(
            self.attempt_timeout,
            self.forwarder.forward(instance, request),
        )
        .await
        {
            Ok(Ok(response)) => {
                if response.status().is_server_error() {
                    tracing::warn!(
                        instance = %instance.base_url,
                        status = %response.status(),
                        "Backend returned server error"
                    );
                }
                Ok(response)
            }
            Ok(Err(e)) => {
                tracing::warn!(instance = %instance.base_url, error = %e, "Upstream error");
                Err(GatewayError::BackendUnavailable(e.to_string()))
            }
            Err(TimedOut(limit)) => {
                tracing::warn!(instance = %instance.base_url, timeout = ?limit, "Upstream attempt timed out");
                Err(GatewayError::BackendTimeout(limit))
            }
        }
    }
}

fn is_retryable_error(err: &GatewayError) -> bool {
    matches!(
        err,
        GatewayError::BackendTimeout(_) | GatewayError::BackendUnavailable(_)
    )
}

/// Success flag to record on the breaker, or `None` if no backend was reached.
fn breaker_outcome(result: &Result<Response<Body>, GatewayError>) -> Option<bool> {
    match result {
        Ok(response) => Some(!response.status().is_server_error()),
        Err(err) if is_retryable_error(err) => Some(false),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FailurePolicy, RateLimitConfig, RetryConfig, RouteConfig, ServiceConfig};
    use crate::resilience::CircuitState;
    use crate::security::store::{CounterStore, MemoryCounterStore, StoreError};
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use futures_util::future::join_all;
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    /// Scripted step for the mock forwarder.
    #[derive(Clone, Copy)]
    enum Step {
        Status(u16),
        /// 200 after the given number of milliseconds.
        Slow(u64),
        Refuse,
        Hang,
    }

    #[derive(Default)]
    struct MockForwarder {
        script: Mutex<VecDeque<Step>>,
        calls: Mutex<Vec<String>>,
    }

    impl MockForwarder {
        fn scripted(steps: &[Step]) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(steps.iter().copied().collect()),
                calls: Mutex::default(),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Forwarder for MockForwarder {
        async fn forward(
            &self,
            instance: &BackendInstance,
            _request: axum::http::Request<Body>,
        ) -> Result<Response<Body>, ForwardError> {
            self.calls
                .lock()
                .unwrap()
                .push(instance.authority.to_string());
            let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Status(200));
            match step {
                Step::Status(code) => Ok(Response::builder()
                    .status(code)
                    .body(Body::from(instance.authority.to_string()))
                    .unwrap()),
                Step::Slow(ms) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(Response::new(Body::empty()))
                }
                Step::Refuse => Err(ForwardError::Transport("connection refused".into())),
                Step::Hang => std::future::pending().await,
            }
        }
    }

    struct DownStore;

    #[async_trait]
    impl CounterStore for DownStore {
        async fn increment(&self, _key: &str, _ttl: Duration) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn get(&self, _key: &str) -> Result<Option<u64>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    struct HangingStore;

    #[async_trait]
    impl CounterStore for HangingStore {
        async fn increment(&self, _key: &str, _ttl: Duration) -> Result<u64, StoreError> {
            std::future::pending().await
        }

        async fn get(&self, _key: &str) -> Result<Option<u64>, StoreError> {
            std::future::pending().await
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        forwarder: Arc<MockForwarder>,
        breakers: Arc<CircuitBreakerRegistry>,
        backends: Arc<BackendManager>,
    }

    fn harness_with(
        forwarder: Arc<MockForwarder>,
        limiter: Option<Arc<RateLimiter>>,
        retry: RetryConfig,
    ) -> Harness {
        let breakers = CircuitBreakerRegistry::with_settings(5, Duration::from_secs(30));
        harness_with_breakers(forwarder, limiter, retry, breakers)
    }

    fn harness_with_breakers(
        forwarder: Arc<MockForwarder>,
        limiter: Option<Arc<RateLimiter>>,
        retry: RetryConfig,
        breakers: CircuitBreakerRegistry,
    ) -> Harness {
        let routes = Arc::new(RouteTable::from_config(&[RouteConfig {
            name: "campaigns".into(),
            path_prefix: "/campaigns".into(),
            host: None,
            service: "campaigns".into(),
            endpoint_class: None,
            strip_prefix: false,
            priority: 0,
        }]));
        let backends = Arc::new(
            BackendManager::new(&[ServiceConfig {
                name: "campaigns".into(),
                instances: vec![
                    "http://10.0.0.1:80".into(),
                    "http://10.0.0.2:80".into(),
                    "http://10.0.0.3:80".into(),
                ],
            }])
            .unwrap(),
        );
        let breakers = Arc::new(breakers);
        let dispatcher = Dispatcher::new(
            routes,
            breakers.clone(),
            limiter,
            backends.clone(),
            forwarder.clone(),
            RetryPolicy::new(&retry),
            Duration::from_secs(1),
        );
        Harness {
            dispatcher,
            forwarder,
            breakers,
            backends,
        }
    }

    fn harness(steps: &[Step]) -> Harness {
        harness_with(
            MockForwarder::scripted(steps),
            None,
            RetryConfig {
                jitter_ratio: 0.0,
                ..RetryConfig::default()
            },
        )
    }

    fn request(method: Method, path: &str) -> DispatchRequest {
        DispatchRequest {
            method,
            uri: path.parse().unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            client: Some(ClientIdentity::Address(Ipv4Addr::LOCALHOST.into())),
            peer: Some(Ipv4Addr::LOCALHOST.into()),
            correlation_id: "test".into(),
        }
    }

    fn get(path: &str) -> DispatchRequest {
        request(Method::GET, path)
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let h = harness(&[]);
        let err = h.dispatcher.route(get("/nowhere")).await.unwrap_err();
        assert!(matches!(err, GatewayError::RouteNotFound(_)));
        assert!(h.forwarder.calls().is_empty());
    }

    #[tokio::test]
    async fn forwards_and_returns_backend_response() {
        let h = harness(&[Step::Status(201)]);
        let dispatched = h.dispatcher.route(get("/campaigns/1")).await.unwrap();
        assert_eq!(dispatched.response.status(), StatusCode::CREATED);
        assert_eq!(h.forwarder.calls(), vec!["10.0.0.1:80"]);
    }

    #[tokio::test]
    async fn skips_unhealthy_instances_in_rotation() {
        let h = harness(&[]);
        for (_, instance) in h.backends.all_instances() {
            if instance.authority.as_str() == "10.0.0.2:80" {
                instance.set_health(false);
            }
        }

        for _ in 0..3 {
            h.dispatcher.route(get("/campaigns")).await.unwrap();
        }
        assert_eq!(
            h.forwarder.calls(),
            vec!["10.0.0.1:80", "10.0.0.3:80", "10.0.0.1:80"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retries_on_a_different_instance() {
        let h = harness(&[Step::Status(503), Step::Refuse, Step::Status(200)]);
        let dispatched = h.dispatcher.route(get("/campaigns")).await.unwrap();

        assert_eq!(dispatched.response.status(), StatusCode::OK);
        assert_eq!(
            h.forwarder.calls(),
            vec!["10.0.0.1:80", "10.0.0.2:80", "10.0.0.3:80"]
        );
        assert_eq!(h.breakers.state("campaigns"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn final_5xx_is_returned_verbatim_after_retries() {
        let h = harness(&[Step::Status(500); 4]);
        let dispatched = h.dispatcher.route(get("/campaigns")).await.unwrap();

        assert_eq!(dispatched.response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(h.forwarder.calls().len(), 4);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let h = harness(&[Step::Status(404)]);
        let dispatched = h.dispatcher.route(get("/campaigns/404")).await.unwrap();
        assert_eq!(dispatched.response.status(), StatusCode::NOT_FOUND);
        assert_eq!(h.forwarder.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn post_without_idempotency_key_is_sent_once() {
        let h = harness(&[Step::Refuse, Step::Status(200)]);
        let err = h
            .dispatcher
            .route(request(Method::POST, "/campaigns"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BackendUnavailable(_)));
        assert_eq!(h.forwarder.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_request_time_is_bounded() {
        let config = RateLimitConfig {
            failure_policy: FailurePolicy::FailOpen,
            ..RateLimitConfig::default()
        };
        let limiter = Arc::new(RateLimiter::new(&config, Arc::new(HangingStore)));
        let h = harness_with(
            MockForwarder::scripted(&[Step::Hang; 4]),
            Some(limiter),
            RetryConfig::default(),
        );
        let bound = h.dispatcher.max_elapsed();
        assert!(bound >= config.store_timeout() + Duration::from_secs(4));
        let started = tokio::time::Instant::now();

        let err = h.dispatcher.route(get("/campaigns")).await.unwrap_err();

        assert!(matches!(err, GatewayError::BackendTimeout(_)));
        assert_eq!(h.forwarder.calls().len(), 4);
        assert!(started.elapsed() <= bound, "{:?} > {:?}", started.elapsed(), bound);
    }

    #[tokio::test]
    async fn all_unhealthy_fails_without_network_calls() {
        let h = harness(&[]);
        for (_, instance) in h.backends.all_instances() {
            instance.set_health(false);
        }

        let err = h.dispatcher.route(get("/campaigns")).await.unwrap_err();
        assert!(matches!(err, GatewayError::NoHealthyInstances(_)));
        assert!(h.forwarder.calls().is_empty());
        // Nothing reached a backend, so the breaker saw nothing.
        assert_eq!(h.breakers.state("campaigns"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn open_circuit_rejects_without_network_calls() {
        let h = harness_with(
            MockForwarder::scripted(&[Step::Status(500); 5]),
            None,
            RetryConfig {
                enabled: false,
                ..RetryConfig::default()
            },
        );
        for _ in 0..5 {
            h.dispatcher.route(get("/campaigns")).await.unwrap();
        }
        assert_eq!(h.breakers.state("campaigns"), CircuitState::Open);

        let err = h.dispatcher.route(get("/campaigns")).await.unwrap_err();
        assert!(matches!(err, GatewayError::CircuitOpen(_)));
        assert_eq!(h.forwarder.calls().len(), 5);
    }

    #[tokio::test]
    async fn half_open_admits_one_trial_that_closes_the_circuit() {
        let h = harness_with_breakers(
            MockForwarder::scripted(&[
                Step::Status(500),
                Step::Status(500),
                Step::Status(500),
                Step::Status(500),
                Step::Status(500),
                Step::Slow(50),
            ]),
            None,
            RetryConfig {
                enabled: false,
                ..RetryConfig::default()
            },
            CircuitBreakerRegistry::with_settings(5, Duration::from_millis(50)),
        );
        for _ in 0..5 {
            h.dispatcher.route(get("/campaigns")).await.unwrap();
        }
        let err = h.dispatcher.route(get("/campaigns")).await.unwrap_err();
        assert!(matches!(err, GatewayError::CircuitOpen(_)));
        assert_eq!(h.forwarder.calls().len(), 5);

        tokio::time::sleep(Duration::from_millis(80)).await;

        // Concurrent burst while the trial is in flight: only the trial is sent.
        let results = join_all((0..10).map(|_| h.dispatcher.route(get("/campaigns")))).await;
        let admitted: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(admitted.len(), 1);
        assert_eq!(admitted[0].response.status(), StatusCode::OK);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, GatewayError::CircuitOpen(_))));
        assert_eq!(h.forwarder.calls().len(), 6);
        assert_eq!(h.breakers.state("campaigns"), CircuitState::Closed);

        h.dispatcher.route(get("/campaigns")).await.unwrap();
        assert_eq!(h.forwarder.calls().len(), 7);
    }

    #[tokio::test]
    async fn breaker_is_checked_before_quota_is_spent() {
        let store = Arc::new(MemoryCounterStore::new());
        let mut config = RateLimitConfig::default();
        config.classes.insert("campaigns".into(), 100);
        let limiter = Arc::new(RateLimiter::new(&config, store.clone()));
        let h = harness_with(MockForwarder::scripted(&[]), Some(limiter), RetryConfig::default());

        for _ in 0..5 {
            h.breakers.record_outcome("campaigns", false);
        }
        let err = h.dispatcher.route(get("/campaigns")).await.unwrap_err();

        assert!(matches!(err, GatewayError::CircuitOpen(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn burst_limit_then_rate_limited() {
        let mut config = RateLimitConfig {
            window_secs: 3600,
            ..RateLimitConfig::default()
        };
        config.classes.insert("campaigns".into(), 10);
        let limiter = Arc::new(RateLimiter::new(&config, Arc::new(MemoryCounterStore::new())));
        let h = harness_with(MockForwarder::scripted(&[]), Some(limiter), RetryConfig::default());

        for i in 0..15u64 {
            let dispatched = h.dispatcher.route(get("/campaigns")).await.unwrap();
            let quota = dispatched.quota.unwrap();
            assert_eq!(quota.limit, 15);
            assert_eq!(quota.remaining, 14 - i);
        }
        let err = h.dispatcher.route(get("/campaigns")).await.unwrap_err();
        match err {
            GatewayError::RateLimited { limit, retry_after } => {
                assert_eq!(limit, 15);
                assert!(retry_after > Duration::ZERO);
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
        assert_eq!(h.forwarder.calls().len(), 15);
    }

    #[tokio::test]
    async fn store_outage_fails_closed_with_503() {
        let limiter = Arc::new(RateLimiter::new(&RateLimitConfig::default(), Arc::new(DownStore)));
        let h = harness_with(MockForwarder::scripted(&[]), Some(limiter), RetryConfig::default());

        let err = h.dispatcher.route(get("/campaigns")).await.unwrap_err();
        assert!(matches!(err, GatewayError::RateLimiterUnavailable));
        assert!(h.forwarder.calls().is_empty());
    }

    #[tokio::test]
    async fn unidentified_client_is_invalid() {
        let h = harness(&[]);
        let mut req = get("/campaigns");
        req.client = None;
        let err = h.dispatcher.route(req).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }
}
