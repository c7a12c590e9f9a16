//! Outbound HTTP client.

use axum::body::Body;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::config::TimeoutConfig;

/// Pooled client shared by request forwarding and health probes. Speaks
/// plain HTTP or HTTPS depending on the instance's scheme.
pub type HttpClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Build the shared client. Connect timeout and idle pooling come from config;
/// per-attempt deadlines are applied by callers.
pub fn build_client(timeouts: &TimeoutConfig) -> HttpClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(timeouts.connect()));
    connector.set_nodelay(true);
    connector.enforce_http(false);

    let https = HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(connector);

    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(std::time::Duration::from_secs(timeouts.idle_secs))
        .build(https)
}
