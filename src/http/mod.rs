//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (correlation id, body buffering)
//!     → dispatch (route, breaker, quota, forward)
//!     → response.rs (quota headers, error mapping)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::CORRELATION_ID;
pub use response::GatewayError;
pub use server::{AppState, HttpServer};
