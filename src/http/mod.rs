//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (accept, hyper connection, Axum router)
//!     → request.rs (per-exchange state, checkpoints, terminal events)
//!     → [engine picks route, queue slot and host]
//!     → target.rs (one attempt against one host)
//!     → forward.rs (backend client) / websocket.rs (upgrade relay)
//!     → response.rs (error pages, redirects, preflight)
//!     → Send to client
//! ```

pub mod forward;
pub mod request;
pub mod response;
pub mod server;
pub mod target;
pub mod websocket;

pub use forward::{ForwardRequest, Forwarder, HyperForwarder};
pub use request::{Request, Terminal};
pub use server::HttpServer;
