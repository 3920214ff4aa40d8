//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (optional TLS handshake, certificate picked by SNI)
//!     → connection.rs (connection record, in-flight requests)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection registered with the engine until its socket closes
//! - TLS is optional and handled transparently

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{Connection, ConnectionId};
pub use listener::{Listener, ListenerError};
pub use tls::SniResolver;
