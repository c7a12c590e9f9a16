//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, spans carrying the correlation id)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON or pretty)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Correlation ID flows through every dispatch span and upstream request
//! - Metrics are cheap (atomic increments) and labelled by service and result

pub mod logging;
pub mod metrics;
