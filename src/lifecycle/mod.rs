//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → counter store → rate limiter → breakers
//!     → backend pools → upstream client → health monitor → routes → dispatcher
//!
//! Run:
//!     Spawn health monitor and counter sweeper → serve HTTP (and admin)
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     SIGTERM/SIGINT → broadcast → stop accepting, drain, background tasks exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: a subsystem is built only after everything it depends on
//! - One owner (`Gateway`) for every shared component; no globals
//! - Listeners start last (traffic only when ready)

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{Gateway, StartupError};
