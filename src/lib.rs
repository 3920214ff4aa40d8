//! Multi-tenant HTTP/WebSocket reverse proxy and load balancer.
//!
//! Requests are matched to a route by virtual host, admitted through the
//! route's queue, sent to a host picked by the route's strategy and retried on
//! other hosts when forwarding fails.

// Core subsystems
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod net;
pub mod routing;

// Traffic management
pub mod health;
pub mod load_balancer;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::schema::ProxyConfig;
pub use engine::ProxyEngine;
pub use error::{ForwardError, ProxyError};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
