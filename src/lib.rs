//! Campaign API gateway: resilience and dispatch layer.

pub mod admin;
pub mod config;
pub mod dispatch;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod security;

pub use config::schema::GatewayConfig;
pub use dispatch::Dispatcher;
pub use http::HttpServer;
pub use lifecycle::{Gateway, Shutdown};
