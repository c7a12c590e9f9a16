//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound:
//!     TcpListener (lifecycle) → tls.rs (optional TLS handshake) → HTTP layer
//!
//! Outbound:
//!     dispatch / health → client.rs (pooled HTTP or HTTPS connections) → backend
//! ```
//!
//! # Design Decisions
//! - One outbound client is built at startup and shared by forwarding and probing
//! - TLS is optional and handled transparently

pub mod client;
pub mod tls;

pub use client::{build_client, HttpClient};
