//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the gateway handler
//! - Wire up middleware (correlation id, tracing, panics, limits, identity)
//! - Serve plain TCP or TLS until the shutdown signal fires

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware,
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::{GatewayConfig, TlsConfig};
use crate::dispatch::{DispatchRequest, Dispatched, Dispatcher};
use crate::http::request::{buffer_body, correlation_header, correlation_id};
use crate::http::response::{set_quota_headers, GatewayError};
use crate::net::tls::load_tls_config;
use crate::security::identity::{identity_middleware, Authenticator};
use crate::security::ClientIdentity;

/// Grace period for in-flight requests on TLS shutdown.
const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub max_body_size: usize,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    tls: Option<TlsConfig>,
}

impl HttpServer {
    pub fn new(
        config: &GatewayConfig,
        dispatcher: Arc<Dispatcher>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        let state = AppState {
            dispatcher,
            max_body_size: config.security.max_body_size,
        };
        Self {
            router: Self::build_router(config, state, authenticator),
            tls: config.listener.tls.clone(),
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(
        config: &GatewayConfig,
        state: AppState,
        authenticator: Arc<dyn Authenticator>,
    ) -> Router {
        let router = Router::new()
            .fallback(gateway_handler)
            .with_state(state)
            .layer(middleware::from_fn_with_state(
                authenticator,
                identity_middleware,
            ))
            .layer(ConcurrencyLimitLayer::new(config.listener.max_connections));
        with_request_layers(router)
    }

    /// The configured router, for serving on a custom transport.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        match self.tls {
            Some(tls) => {
                let rustls = load_tls_config(&tls).await?;
                tracing::info!(address = %addr, "HTTPS server starting");

                let handle = axum_server::Handle::new();
                let drain = handle.clone();
                tokio::spawn(async move {
                    let _ = shutdown.recv().await;
                    drain.graceful_shutdown(Some(TLS_DRAIN_TIMEOUT));
                });

                axum_server::from_tcp_rustls(listener.into_std()?, rustls)
                    .handle(handle)
                    .serve(app)
                    .await?;
            }
            None => {
                tracing::info!(address = %addr, "HTTP server starting");
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown.recv().await;
                    })
                    .await?;
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Every request that is not an admin call goes through the dispatcher.
async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let correlation_id = correlation_id(request.headers());
    let client = request.extensions().get::<ClientIdentity>().cloned();
    let (parts, body) = request.into_parts();

    let body = match buffer_body(body, state.max_body_size).await {
        Ok(body) => body,
        Err(err) => return err.into_response_with(&correlation_id),
    };

    let dispatch = DispatchRequest {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
        body,
        client,
        peer: Some(peer.ip()),
        correlation_id: correlation_id.clone(),
    };

    match state.dispatcher.route(dispatch).await {
        Ok(Dispatched {
            mut response,
            quota,
        }) => {
            if let Some(quota) = quota {
                set_quota_headers(response.headers_mut(), quota.limit, quota.remaining);
            }
            response.into_response()
        }
        Err(err) => err.into_response_with(&correlation_id),
    }
}

/// Correlation id, access tracing and panic recovery around `router`.
fn with_request_layers(router: Router) -> Router {
    router
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(correlation_header()))
        .layer(SetRequestIdLayer::new(correlation_header(), MakeRequestUuid))
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    GatewayError::Internal(format!("handler panicked: {}", detail)).into_response()
}
