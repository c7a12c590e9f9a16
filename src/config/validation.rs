//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing services)
//! - Validate value ranges (timeouts > 0, multipliers >= 1)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use thiserror::Error;
use url::Url;

use crate::config::schema::{GatewayConfig, StoreKind};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("service name must not be empty")]
    EmptyServiceName,

    #[error("service '{0}' is defined more than once")]
    DuplicateService(String),

    #[error("service '{0}' has no instances")]
    NoInstances(String),

    #[error("service '{service}' has invalid instance url '{url}': {reason}")]
    InvalidInstanceUrl {
        service: String,
        url: String,
        reason: String,
    },

    #[error("route '{route}' references unknown service '{service}'")]
    UnknownService { route: String, service: String },

    #[error("route '{0}' path prefix must start with '/'")]
    InvalidPathPrefix(String),

    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("{field} must be at least 1.0 (got {value})")]
    MultiplierTooSmall { field: &'static str, value: f64 },

    #[error("retries.jitter_ratio must be within [0, 1] (got {0})")]
    InvalidJitter(f64),

    #[error("rate_limit.store.redis_url is required for the redis store")]
    MissingRedisUrl,
}

/// Validate a deserialized configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut services = HashSet::new();
    for service in &config.services {
        if service.name.is_empty() {
            errors.push(ValidationError::EmptyServiceName);
            continue;
        }
        if !services.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService(service.name.clone()));
        }
        if service.instances.is_empty() {
            errors.push(ValidationError::NoInstances(service.name.clone()));
        }
        for raw in &service.instances {
            if let Err(reason) = check_instance_url(raw) {
                errors.push(ValidationError::InvalidInstanceUrl {
                    service: service.name.clone(),
                    url: raw.clone(),
                    reason,
                });
            }
        }
    }

    for route in &config.routes {
        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::InvalidPathPrefix(route.name.clone()));
        }
        if !services.contains(route.service.as_str()) {
            errors.push(ValidationError::UnknownService {
                route: route.name.clone(),
                service: route.service.clone(),
            });
        }
    }

    let rl = &config.rate_limit;
    positive(&mut errors, "rate_limit.window_secs", rl.window_secs);
    positive(&mut errors, "rate_limit.store_timeout_ms", rl.store_timeout_ms);
    at_least_one(&mut errors, "rate_limit.burst_multiplier", rl.burst_multiplier);
    if rl.store.kind == StoreKind::Memory {
        positive(&mut errors, "rate_limit.store.sweep_interval_secs", rl.store.sweep_interval_secs);
    }
    if rl.store.kind == StoreKind::Redis && rl.store.redis_url.is_none() {
        errors.push(ValidationError::MissingRedisUrl);
    }

    positive(
        &mut errors,
        "circuit_breaker.failure_threshold",
        config.circuit_breaker.failure_threshold as u64,
    );
    positive(
        &mut errors,
        "circuit_breaker.recovery_timeout_secs",
        config.circuit_breaker.recovery_timeout_secs,
    );

    at_least_one(&mut errors, "retries.multiplier", config.retries.multiplier);
    if !(0.0..=1.0).contains(&config.retries.jitter_ratio) {
        errors.push(ValidationError::InvalidJitter(config.retries.jitter_ratio));
    }

    positive(&mut errors, "timeouts.attempt_ms", config.timeouts.attempt_ms);
    positive(&mut errors, "timeouts.connect_ms", config.timeouts.connect_ms);

    if config.health_check.enabled {
        positive(&mut errors, "health_check.interval_secs", config.health_check.interval_secs);
        positive(&mut errors, "health_check.timeout_secs", config.health_check.timeout_secs);
    }

    positive(&mut errors, "listener.max_connections", config.listener.max_connections as u64);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_instance_url(raw: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme '{}'", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err("base url must not carry a query or fragment".to_string());
    }
    Ok(())
}

fn positive(errors: &mut Vec<ValidationError>, field: &'static str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::NotPositive { field });
    }
}

fn at_least_one(errors: &mut Vec<ValidationError>, field: &'static str, value: f64) {
    if !(value >= 1.0) {
        errors.push(ValidationError::MultiplierTooSmall { field, value });
    }
}
