//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path)
//!     → router.rs (route lookup)
//!     → matcher.rs (evaluate match conditions)
//!     → Return: ResolvedRoute (service, endpoint class) or no match
//!
//! Route Compilation (at startup):
//!     RouteConfig[]
//!     → Sort by priority, then prefix length
//!     → Compile matchers
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - First match wins

pub mod matcher;
pub mod router;

pub use matcher::RouteInput;
pub use router::{ResolvedRoute, RouteTable};
