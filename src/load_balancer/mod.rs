//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route resolved → service name identified
//!     → pool.rs (instances registered for the service)
//!     → round_robin.rs (rotate through healthy instances)
//!     → Return instance or None when nothing is healthy
//! ```
//!
//! # Design Decisions
//! - Instances are owned by the pool; the balancer only holds a cursor
//! - Unhealthy instances are excluded from selection
//! - Health is written by the health monitor and read here lock-free

use std::fmt::Debug;
use std::sync::Arc;

pub mod backend;
pub mod pool;
pub mod round_robin;

pub use backend::{BackendInstance, InstanceStatus};
pub use pool::{BackendManager, BackendPool};
pub use round_robin::RoundRobin;

/// Strategy for picking one instance out of a service's pool.
pub trait LoadBalancer: Send + Sync + Debug {
    /// Pick the next healthy instance, preferring ones not in `tried`.
    fn next_server(
        &self,
        backends: &[Arc<BackendInstance>],
        tried: &[Arc<BackendInstance>],
    ) -> Option<Arc<BackendInstance>>;
}
