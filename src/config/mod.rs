//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → engine settings + initial route table
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → engine.sync(routes) replaces the route table
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Only routes hot-reload; everything else is read once at startup

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, AuthConfig, HeaderRule, HeaderTarget, HostConfig, ListenerConfig, LogFormat,
    ObservabilityConfig, ProxyConfig, ProxySettings, RouteConfig, RouteTlsConfig,
    TlsListenerConfig, TrackerConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::RouteWatcher;
