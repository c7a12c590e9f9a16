//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → handed to lifecycle::startup, which builds every subsystem from it
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, CircuitBreakerConfig, FailurePolicy, GatewayConfig, HealthCheckConfig,
    ListenerConfig, LogFormat, ObservabilityConfig, RateLimitConfig, RetryConfig, RouteConfig,
    SecurityConfig, ServiceConfig, StoreConfig, StoreKind, TimeoutConfig, TlsConfig,
};
pub use validation::ValidationError;
