//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize all subsystems in dependency order from a validated config
//! - Start background tasks (health checks, counter sweeping, admin API)
//! - Serve traffic until shutdown, then wait for background tasks
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::{GatewayConfig, StoreKind};
use crate::dispatch::{Dispatcher, UpstreamClient};
use crate::health::HealthMonitor;
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::load_balancer::BackendManager;
use crate::net::{build_client, HttpClient};
use crate::resilience::{CircuitBreakerRegistry, RetryPolicy};
use crate::routing::RouteTable;
use crate::security::rate_limit::run_sweeper;
use crate::security::{
    CounterStore, HeaderAuthenticator, MemoryCounterStore, RateLimiter, RedisCounterStore,
    StoreError,
};

/// How long background tasks get to exit after the server stops.
const BACKGROUND_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid backend configuration: {0}")]
    Backend(String),

    #[error("rate counter store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("redis store selected but no redis_url configured")]
    MissingRedisUrl,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Every long-lived component, built once and owned here.
pub struct Gateway {
    config: GatewayConfig,
    store: Arc<dyn CounterStore>,
    breakers: Arc<CircuitBreakerRegistry>,
    backends: Arc<BackendManager>,
    client: HttpClient,
    health: HealthMonitor,
    dispatcher: Arc<Dispatcher>,
}

impl Gateway {
    /// Construct the gateway from an already validated config.
    pub async fn build(config: GatewayConfig) -> Result<Self, StartupError> {
        // 1. Shared counter store.
        let store: Arc<dyn CounterStore> = match config.rate_limit.store.kind {
            StoreKind::Memory => Arc::new(MemoryCounterStore::new()),
            StoreKind::Redis => {
                let url = config
                    .rate_limit
                    .store
                    .redis_url
                    .as_deref()
                    .ok_or(StartupError::MissingRedisUrl)?;
                Arc::new(RedisCounterStore::connect(url).await?)
            }
        };

        // 2. Rate limiter.
        let limiter = config
            .rate_limit
            .enabled
            .then(|| Arc::new(RateLimiter::new(&config.rate_limit, store.clone())));

        // 3. Circuit breakers.
        let breakers = Arc::new(CircuitBreakerRegistry::new(&config.circuit_breaker));

        // 4. Backend pools.
        let backends =
            Arc::new(BackendManager::new(&config.services).map_err(StartupError::Backend)?);

        // 5. Upstream connection pool, shared by forwarding and probing.
        let client = build_client(&config.timeouts);

        // 6. Health monitor.
        let health = HealthMonitor::new(
            backends.clone(),
            config.health_check.clone(),
            client.clone(),
        );

        // 7. Routes and 8. dispatcher.
        let routes = Arc::new(RouteTable::from_config(&config.routes));
        let retry = RetryPolicy::new(&config.retries);
        let dispatcher = Arc::new(Dispatcher::new(
            routes.clone(),
            breakers.clone(),
            limiter,
            backends.clone(),
            Arc::new(UpstreamClient::new(client.clone())),
            retry,
            config.timeouts.attempt(),
        ));

        tracing::info!(
            routes = routes.len(),
            services = config.services.len(),
            store = ?config.rate_limit.store.kind,
            rate_limit = config.rate_limit.enabled,
            max_request_time = ?dispatcher.max_elapsed(),
            "Gateway initialized"
        );

        Ok(Self {
            config,
            store,
            breakers,
            backends,
            client,
            health,
            dispatcher,
        })
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn backends(&self) -> &Arc<BackendManager> {
        &self.backends
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), StartupError> {
        let Gateway {
            config,
            store,
            breakers,
            backends,
            client,
            health,
            dispatcher,
        } = self;

        let mut background: Vec<JoinHandle<()>> = Vec::new();

        background.push(tokio::spawn(health.run(shutdown.subscribe())));

        if !store.native_ttl() {
            let interval = Duration::from_secs(config.rate_limit.store.sweep_interval_secs);
            background.push(tokio::spawn(run_sweeper(
                store,
                interval,
                shutdown.subscribe(),
            )));
        }

        if config.admin.enabled {
            let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
            tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
            let router = setup_admin_router(AdminState {
                api_key: Arc::from(config.admin.api_key.as_str()),
                backends,
                breakers,
                started_at: Instant::now(),
            });
            let mut admin_shutdown = shutdown.subscribe();
            background.push(tokio::spawn(async move {
                let served = axum::serve(admin_listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = admin_shutdown.recv().await;
                    })
                    .await;
                if let Err(e) = served {
                    tracing::error!(error = %e, "Admin API failed");
                }
            }));
        }

        let authenticator = Arc::new(HeaderAuthenticator::new(
            config.security.client_id_header.clone(),
        ));
        let server = HttpServer::new(&config, dispatcher, authenticator);
        let served = server.run(listener, shutdown.subscribe()).await;

        // The server can also stop on its own (accept error); make sure the
        // background tasks hear about it either way.
        shutdown.trigger();
        for task in background {
            if tokio::time::timeout(BACKGROUND_EXIT_TIMEOUT, task).await.is_err() {
                tracing::warn!("Background task did not exit in time");
            }
        }
        drop(client);
        tracing::info!("Upstream connection pool closed");

        served.map_err(StartupError::from)
    }
}
