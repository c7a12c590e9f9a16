//! Upstream forwarding.
//!
//! # Responsibilities
//! - Turn a buffered inbound request into a request for one instance
//! - Strip hop-by-hop headers in both directions
//! - Propagate the correlation id and append `x-forwarded-for`

use std::net::IpAddr;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, Response};
use thiserror::Error;

use crate::http::request::correlation_header;
use crate::load_balancer::BackendInstance;
use crate::net::HttpClient;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Connection-scoped headers that must not be forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("could not build upstream request: {0}")]
    Build(String),

    #[error("upstream transport error: {0}")]
    Transport(String),
}

/// The parts of an inbound request that survive across attempts.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    /// Path and query to request on the instance.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub correlation_id: String,
    pub peer: Option<IpAddr>,
}

impl UpstreamRequest {
    /// Build the request for one attempt against `instance`.
    pub fn build_for(&self, instance: &BackendInstance) -> Result<Request<Body>, ForwardError> {
        let uri = instance
            .uri_for(&self.path_and_query)
            .map_err(|e| ForwardError::Build(e.to_string()))?;

        let mut headers = self.headers.clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        if let Ok(value) = HeaderValue::from_str(&self.correlation_id) {
            headers.insert(correlation_header(), value);
        }
        if let Some(peer) = self.peer {
            let forwarded = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(existing) => format!("{}, {}", existing, peer),
                None => peer.to_string(),
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded) {
                headers.insert(X_FORWARDED_FOR, value);
            }
        }

        let mut request = Request::builder()
            .method(self.method.clone())
            .uri(uri)
            .body(Body::from(self.body.clone()))
            .map_err(|e| ForwardError::Build(e.to_string()))?;
        *request.headers_mut() = headers;
        Ok(request)
    }
}

pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named in `Connection` are hop-by-hop too.
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Sends one attempt to one instance. No retries or deadlines here; the
/// dispatcher owns both.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(
        &self,
        instance: &BackendInstance,
        request: Request<Body>,
    ) -> Result<Response<Body>, ForwardError>;
}

/// [`Forwarder`] over the shared pooled client.
#[derive(Clone)]
pub struct UpstreamClient {
    client: HttpClient,
}

impl UpstreamClient {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Forwarder for UpstreamClient {
    async fn forward(
        &self,
        _instance: &BackendInstance,
        request: Request<Body>,
    ) -> Result<Response<Body>, ForwardError> {
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| ForwardError::Transport(e.to_string()))?;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}
