//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every backend instance
//! - Update instance health based on results
//! - Answer `is_healthy(service)` for readers

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::config::HealthCheckConfig;
use crate::load_balancer::{BackendInstance, BackendManager};
use crate::net::HttpClient;
use crate::observability::metrics;
use crate::resilience::{with_timeout, TimedOut};

const USER_AGENT: &str = "campaign-gateway-health-check";

pub struct HealthMonitor {
    backends: Arc<BackendManager>,
    config: HealthCheckConfig,
    client: HttpClient,
}

impl HealthMonitor {
    pub fn new(backends: Arc<BackendManager>, config: HealthCheckConfig, client: HttpClient) -> Self {
        Self {
            backends,
            config,
            client,
        }
    }

    /// Whether `service` has at least one healthy instance.
    pub fn is_healthy(&self, service: &str) -> bool {
        self.backends.is_healthy(service)
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            path = %self.config.path,
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every instance once, concurrently, and store the results.
    pub async fn probe_all(&self) {
        let instances = self.backends.all_instances();
        let results = join_all(
            instances
                .iter()
                .map(|(_, instance)| self.probe(instance)),
        )
        .await;

        for ((service, instance), healthy) in instances.iter().zip(results) {
            if instance.set_health(healthy) {
                if healthy {
                    tracing::info!(service = %service, instance = %instance.base_url, "Instance recovered");
                } else {
                    tracing::warn!(service = %service, instance = %instance.base_url, "Instance marked unhealthy");
                }
            }
            metrics::record_backend_health(service, instance.base_url.as_str(), healthy);
        }
    }

    async fn probe(&self, instance: &BackendInstance) -> bool {
        let uri = match instance.uri_for(&self.config.path) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::error!(instance = %instance.base_url, error = %e, "Invalid health check url");
                return false;
            }
        };

        let request = match Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(header::USER_AGENT, USER_AGENT)
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!("Failed to build health check request: {}", e);
                return false;
            }
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        match with_timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let status: StatusCode = response.status();
                if !status.is_success() {
                    tracing::debug!(instance = %instance.base_url, status = %status, "Health check failed: non-success status");
                }
                status.is_success()
            }
            Ok(Err(e)) => {
                tracing::debug!(instance = %instance.base_url, error = %e, "Health check failed: connection error");
                false
            }
            Err(TimedOut(limit)) => {
                tracing::debug!(instance = %instance.base_url, timeout = ?limit, "Health check failed: timeout");
                false
            }
        }
    }
}
