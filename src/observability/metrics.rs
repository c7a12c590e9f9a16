//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by service, result, status
//! - `gateway_request_duration_seconds` (histogram): latency by service, result
//! - `gateway_retries_total` (counter): retried attempts by service
//! - `gateway_rate_limited_total` (counter): throttled requests by endpoint class
//! - `gateway_rate_limit_store_errors_total` (counter): store failures by policy
//! - `gateway_circuit_transitions_total` (counter): breaker transitions
//! - `gateway_backend_health` (gauge): 1=healthy, 0=unhealthy
//!
//! Every function is a cheap no-op until a recorder is installed.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record the final outcome of one routed request.
pub fn record_request(service: &str, result: &'static str, status: u16, start: Instant) {
    let service = service.to_string();
    counter!(
        "gateway_requests_total",
        "service" => service.clone(),
        "result" => result,
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(
        "gateway_request_duration_seconds",
        "service" => service,
        "result" => result
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_retry(service: &str) {
    counter!("gateway_retries_total", "service" => service.to_string()).increment(1);
}

pub fn record_rate_limited(endpoint_class: &str) {
    counter!("gateway_rate_limited_total", "class" => endpoint_class.to_string()).increment(1);
}

pub fn record_store_error(policy: &'static str) {
    counter!("gateway_rate_limit_store_errors_total", "policy" => policy).increment(1);
}

pub fn record_circuit_transition(service: &str, to: &'static str) {
    counter!(
        "gateway_circuit_transitions_total",
        "service" => service.to_string(),
        "to" => to
    )
    .increment(1);
}

pub fn record_backend_health(service: &str, instance: &str, healthy: bool) {
    gauge!(
        "gateway_backend_health",
        "service" => service.to_string(),
        "instance" => instance.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}
