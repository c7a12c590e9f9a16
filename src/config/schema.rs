//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Route definitions mapping request paths to services.
    pub routes: Vec<RouteConfig>,

    /// Backend services and their instances.
    pub services: Vec<ServiceConfig>,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Circuit breaker configuration.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Inbound request handling.
    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrently processed requests (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_connections: 10_000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Route configuration mapping a path prefix to a logical service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Path prefix to match.
    pub path_prefix: String,

    /// Host header to match (exact, case-insensitive).
    #[serde(default)]
    pub host: Option<String>,

    /// Logical service the route forwards to.
    pub service: String,

    /// Endpoint class for rate limiting. Defaults to the route name.
    #[serde(default)]
    pub endpoint_class: Option<String>,

    /// Remove the matched prefix before forwarding.
    #[serde(default)]
    pub strip_prefix: bool,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,
}

impl RouteConfig {
    /// Endpoint class this route is counted under.
    pub fn endpoint_class(&self) -> &str {
        self.endpoint_class.as_deref().unwrap_or(&self.name)
    }
}

/// A logical backend service and its replicas.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Unique service name referenced by routes.
    pub name: String,

    /// Base URLs of the instances (e.g., "http://10.0.0.5:3000").
    pub instances: Vec<String>,
}

/// What the rate limiter does when the shared store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Admit the request.
    FailOpen,
    /// Reject the request with a 503.
    #[default]
    FailClosed,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::FailOpen => "fail_open",
            FailurePolicy::FailClosed => "fail_closed",
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Fixed window length in seconds, aligned to wall-clock boundaries.
    pub window_secs: u64,

    /// Burst limit = base limit × multiplier.
    pub burst_multiplier: f64,

    /// Base limit for endpoint classes without an explicit entry.
    pub default_limit: u64,

    /// Base limit per endpoint class.
    pub classes: HashMap<String, u64>,

    /// Behaviour when the counter store is unavailable.
    pub failure_policy: FailurePolicy,

    /// Deadline for a single store call in milliseconds.
    pub store_timeout_ms: u64,

    /// Counter store backend.
    pub store: StoreConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 60,
            burst_multiplier: 1.5,
            default_limit: 100,
            classes: HashMap::new(),
            failure_policy: FailurePolicy::FailClosed,
            store_timeout_ms: 250,
            store: StoreConfig::default(),
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// Counter store backend kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Process-local store. Only coherent for a single gateway instance.
    #[default]
    Memory,
    /// Redis shared by all gateway instances.
    Redis,
}

/// Counter store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,

    /// Connection URL for the redis store (e.g., "redis://127.0.0.1:6379").
    pub redis_url: Option<String>,

    /// Prefix for every counter key.
    pub key_prefix: String,

    /// Stale-key sweep interval for stores without native TTL.
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Memory,
            redis_url: None,
            key_prefix: "ratelimit".to_string(),
            sweep_interval_secs: 30,
        }
    }
}

/// Circuit breaker configuration, applied per service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Time an open circuit waits before admitting a trial call, in seconds.
    pub recovery_timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 30,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Growth factor between consecutive backoff delays.
    pub multiplier: f64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Upper bound of the random jitter, as a fraction of the delay.
    pub jitter_ratio: f64,

    /// Retry POST/PATCH even without an idempotency key.
    pub retry_non_idempotent: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 2000,
            jitter_ratio: 0.1,
            retry_non_idempotent: false,
        }
    }
}

/// Timeout configuration for upstream calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for one forwarding attempt in milliseconds.
    pub attempt_ms: u64,

    /// Connection establishment timeout in milliseconds.
    pub connect_ms: u64,

    /// Idle pooled connection timeout in seconds.
    pub idle_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            attempt_ms: 10_000,
            connect_ms: 2_000,
            idle_secs: 90,
        }
    }
}

impl TimeoutConfig {
    pub fn attempt(&self) -> Duration {
        Duration::from_millis(self.attempt_ms)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,

    /// Path to probe on every instance.
    pub path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            timeout_secs: 5,
            path: "/health".to_string(),
        }
    }
}

/// Inbound request handling.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Header carrying the client API key.
    pub client_id_header: String,

    /// Maximum body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            client_id_header: "x-api-key".to_string(),
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
