use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::load_balancer::pool::ServiceStatus;
use crate::resilience::circuit_breaker::CircuitSnapshot;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub services: usize,
    pub healthy_services: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let pools: Vec<_> = state.backends.pools().collect();
    let healthy = pools.iter().filter(|p| p.is_healthy()).count();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if healthy == pools.len() { "operational" } else { "degraded" },
        uptime_secs: state.started_at.elapsed().as_secs(),
        services: pools.len(),
        healthy_services: healthy,
    })
}

pub async fn get_backends(State(state): State<AdminState>) -> Json<Vec<ServiceStatus>> {
    Json(state.backends.status())
}

pub async fn get_circuits(State(state): State<AdminState>) -> Json<Vec<CircuitSnapshot>> {
    Json(state.breakers.snapshot())
}
