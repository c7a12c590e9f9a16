//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe every instance concurrently (GET <instance><path>)
//!     → 2xx marks the instance healthy, anything else unhealthy
//!     → Load balancer reads the flag on the next selection
//! ```
//!
//! # Design Decisions
//! - Instances start healthy so traffic flows before the first probe
//! - The monitor is the only writer of instance health
//! - Health is per instance; a service is healthy while any instance is

pub mod active;

pub use active::HealthMonitor;
