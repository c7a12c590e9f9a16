//! Client identity resolution.
//!
//! Credential validation belongs to the authentication component; the
//! gateway only needs a stable identifier to count requests against. The
//! [`Authenticator`] trait is where that component plugs in.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use thiserror::Error;

/// Identifier the rate limiter counts against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientIdentity {
    /// Presented API key.
    ApiKey(String),
    /// Source address for anonymous callers.
    Address(IpAddr),
}

impl ClientIdentity {
    /// Stable key used in counter names.
    pub fn key(&self) -> String {
        match self {
            ClientIdentity::ApiKey(key) => format!("key:{}", key),
            ClientIdentity::Address(ip) => format!("ip:{}", ip),
        }
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientIdentity::ApiKey(_) => write!(f, "api-key"),
            ClientIdentity::Address(ip) => write!(f, "{}", ip),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("malformed credentials: {0}")]
    Malformed(String),
}

/// Resolves who is calling.
pub trait Authenticator: Send + Sync {
    fn identify(&self, headers: &HeaderMap, peer: SocketAddr) -> Result<ClientIdentity, AuthError>;
}

/// Uses the API key header when present, otherwise the peer address.
#[derive(Debug, Clone)]
pub struct HeaderAuthenticator {
    header: String,
}

impl HeaderAuthenticator {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into().to_lowercase(),
        }
    }
}

impl Authenticator for HeaderAuthenticator {
    fn identify(&self, headers: &HeaderMap, peer: SocketAddr) -> Result<ClientIdentity, AuthError> {
        match headers.get(self.header.as_str()) {
            Some(value) => {
                let key = value
                    .to_str()
                    .map_err(|_| AuthError::Malformed(format!("{} is not valid ASCII", self.header)))?
                    .trim();
                if key.is_empty() {
                    return Err(AuthError::Malformed(format!("{} is empty", self.header)));
                }
                Ok(ClientIdentity::ApiKey(key.to_string()))
            }
            None => Ok(ClientIdentity::Address(peer.ip())),
        }
    }
}

/// Middleware attaching a [`ClientIdentity`] extension to every request.
///
/// Requests whose credentials cannot be read are passed on without an
/// identity; the dispatcher rejects them as invalid.
pub async fn identity_middleware(
    State(authenticator): State<Arc<dyn Authenticator>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    match authenticator.identify(request.headers(), peer) {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
        }
        Err(e) => {
            tracing::debug!(peer = %peer, error = %e, "Could not identify client");
        }
    }
    next.run(request).await
}
