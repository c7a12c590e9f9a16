//! Admin API.
//!
//! Served on its own listener, guarded by a bearer key. Read-only views of
//! backend health and circuit breaker state.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{middleware, routing::get, Router};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::load_balancer::BackendManager;
use crate::resilience::CircuitBreakerRegistry;

#[derive(Clone)]
pub struct AdminState {
    pub api_key: Arc<str>,
    pub backends: Arc<BackendManager>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub started_at: Instant,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/backends", get(get_backends))
        .route("/admin/circuits", get(get_circuits))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}
