//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → identity.rs (resolve client: API key or source address)
//!     → rate_limit.rs (fixed-window check per endpoint class and client)
//!         → store.rs / redis_store.rs (atomic increment with TTL)
//!     → Pass to dispatch
//! ```
//!
//! # Design Decisions
//! - Counters live in a store shared by all gateway instances
//! - Store failures follow an explicit policy; fail closed by default
//! - Identity resolution is pluggable; credential checks happen upstream

pub mod identity;
pub mod rate_limit;
pub mod redis_store;
pub mod store;

pub use identity::{Authenticator, ClientIdentity, HeaderAuthenticator};
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use redis_store::RedisCounterStore;
pub use store::{CounterStore, MemoryCounterStore, StoreError};
