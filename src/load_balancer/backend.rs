//! Backend instance abstraction.
//!
//! # Responsibilities
//! - Represent a single replica of a service
//! - Track health as last reported by the health monitor
//! - Record when the instance was last probed

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::uri::{Authority, InvalidUri, Scheme};
use axum::http::Uri;
use serde::Serialize;
use url::Url;

/// One network-addressable replica of a service.
#[derive(Debug)]
pub struct BackendInstance {
    /// Base URL the instance was configured with.
    pub base_url: Url,
    /// `host:port` used as the upstream authority.
    pub authority: Authority,
    /// `http` or `https`.
    pub scheme: Scheme,
    /// Path of the base URL without a trailing slash; empty for the root.
    base_path: String,
    healthy: AtomicBool,
    /// Milliseconds since the Unix epoch of the last probe; 0 = never probed.
    last_health_check_ms: AtomicU64,
}

impl BackendInstance {
    /// Create an instance from its base URL. Instances start healthy so traffic
    /// flows before the first probe completes.
    pub fn new(base_url: Url) -> Result<Self, String> {
        let host = base_url
            .host_str()
            .ok_or_else(|| format!("instance url '{}' has no host", base_url))?;
        let port = base_url
            .port_or_known_default()
            .ok_or_else(|| format!("instance url '{}' has no port", base_url))?;
        let authority: Authority = format!("{}:{}", host, port)
            .parse()
            .map_err(|e| format!("instance url '{}': {}", base_url, e))?;
        let scheme = match base_url.scheme() {
            "http" => Scheme::HTTP,
            "https" => Scheme::HTTPS,
            other => {
                return Err(format!(
                    "instance url '{}': unsupported scheme '{}'",
                    base_url, other
                ))
            }
        };
        let base_path = base_url.path().trim_end_matches('/').to_string();

        Ok(Self {
            base_url,
            authority,
            scheme,
            base_path,
            healthy: AtomicBool::new(true),
            last_health_check_ms: AtomicU64::new(0),
        })
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let url = Url::parse(raw).map_err(|e| format!("invalid instance url '{}': {}", raw, e))?;
        Self::new(url)
    }

    /// Absolute URI for `path_and_query` under this instance's base URL.
    pub fn uri_for(&self, path_and_query: &str) -> Result<Uri, InvalidUri> {
        let path = if path_and_query.starts_with('/') {
            format!("{}{}", self.base_path, path_and_query)
        } else {
            format!("{}/{}", self.base_path, path_and_query)
        };
        format!("{}://{}{}", self.scheme, self.authority, path).parse()
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Store a probe result. Returns true when health flipped.
    pub fn set_health(&self, healthy: bool) -> bool {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.last_health_check_ms.store(now_ms, Ordering::Relaxed);
        self.healthy.swap(healthy, Ordering::AcqRel) != healthy
    }

    /// Time of the last probe, if any.
    pub fn last_health_check(&self) -> Option<SystemTime> {
        match self.last_health_check_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(UNIX_EPOCH + Duration::from_millis(ms)),
        }
    }

    pub fn status(&self) -> InstanceStatus {
        InstanceStatus {
            address: self.base_url.to_string(),
            healthy: self.is_healthy(),
            last_health_check_ms: match self.last_health_check_ms.load(Ordering::Relaxed) {
                0 => None,
                ms => Some(ms),
            },
        }
    }
}

/// Serializable view of an instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    pub address: String,
    pub healthy: bool,
    pub last_health_check_ms: Option<u64>,
}
