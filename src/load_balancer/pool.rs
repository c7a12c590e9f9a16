//! Backend pool management.
//!
//! # Responsibilities
//! - Hold the instances of each service
//! - Apply the load balancing algorithm to select an instance
//! - Expose every instance to the health monitor

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::config::ServiceConfig;
use crate::load_balancer::{
    backend::{BackendInstance, InstanceStatus},
    round_robin::RoundRobin,
    LoadBalancer,
};

/// Instances of one service plus the balancer rotating over them.
#[derive(Debug)]
pub struct BackendPool {
    pub service: String,
    instances: Vec<Arc<BackendInstance>>,
    balancer: Box<dyn LoadBalancer>,
}

impl BackendPool {
    pub fn new(service: impl Into<String>, instances: Vec<Arc<BackendInstance>>) -> Self {
        Self {
            service: service.into(),
            instances,
            balancer: Box::new(RoundRobin::new()),
        }
    }

    pub fn instances(&self) -> &[Arc<BackendInstance>] {
        &self.instances
    }

    pub fn select(&self, tried: &[Arc<BackendInstance>]) -> Option<Arc<BackendInstance>> {
        self.balancer.next_server(&self.instances, tried)
    }

    /// A service is healthy while at least one instance is.
    pub fn is_healthy(&self) -> bool {
        self.instances.iter().any(|i| i.is_healthy())
    }

    pub fn healthy_count(&self) -> usize {
        self.instances.iter().filter(|i| i.is_healthy()).count()
    }
}

/// Serializable view of a pool.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub service: String,
    pub healthy: bool,
    pub healthy_instances: usize,
    pub instances: Vec<InstanceStatus>,
}

/// Registry of pools keyed by service name.
#[derive(Debug, Default)]
pub struct BackendManager {
    pools: HashMap<String, BackendPool>,
}

impl BackendManager {
    /// Build pools from configuration. Fails on the first unusable instance url.
    pub fn new(services: &[ServiceConfig]) -> Result<Self, String> {
        let mut pools = HashMap::with_capacity(services.len());
        for service in services {
            let instances = service
                .instances
                .iter()
                .map(|raw| BackendInstance::parse(raw).map(Arc::new))
                .collect::<Result<Vec<_>, _>>()?;
            tracing::debug!(
                service = %service.name,
                instances = instances.len(),
                "Registered service pool"
            );
            pools.insert(
                service.name.clone(),
                BackendPool::new(service.name.clone(), instances),
            );
        }
        Ok(Self { pools })
    }

    pub fn pool(&self, service: &str) -> Option<&BackendPool> {
        self.pools.get(service)
    }

    /// Select an instance for `service`, skipping `tried` where possible.
    pub fn select(
        &self,
        service: &str,
        tried: &[Arc<BackendInstance>],
    ) -> Option<Arc<BackendInstance>> {
        match self.pools.get(service) {
            Some(pool) => {
                let selected = pool.select(tried);
                if selected.is_none() {
                    tracing::debug!(
                        service = %service,
                        instance_count = pool.instances.len(),
                        "No healthy instances in pool"
                    );
                }
                selected
            }
            None => {
                tracing::debug!(service = %service, "Service not found in BackendManager");
                None
            }
        }
    }

    pub fn is_healthy(&self, service: &str) -> bool {
        self.pools.get(service).is_some_and(BackendPool::is_healthy)
    }

    pub fn pools(&self) -> impl Iterator<Item = &BackendPool> {
        self.pools.values()
    }

    /// Every instance of every service, tagged with its service (for health checking).
    pub fn all_instances(&self) -> Vec<(String, Arc<BackendInstance>)> {
        self.pools
            .values()
            .flat_map(|pool| {
                pool.instances
                    .iter()
                    .map(move |i| (pool.service.clone(), i.clone()))
            })
            .collect()
    }

    pub fn status(&self) -> Vec<ServiceStatus> {
        let mut status: Vec<_> = self
            .pools
            .values()
            .map(|pool| ServiceStatus {
                service: pool.service.clone(),
                healthy: pool.is_healthy(),
                healthy_instances: pool.healthy_count(),
                instances: pool.instances.iter().map(|i| i.status()).collect(),
            })
            .collect();
        status.sort_by(|a, b| a.service.cmp(&b.service));
        status
    }
}
