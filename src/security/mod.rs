//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request on an authenticated route:
//!     → auth.rs (Basic credentials → auth caller, cached decision)
//!
//! Forwarded request / proxied response:
//!     → headers.rs (X-Forwarded-*, route header rules, CORS, hop-by-hop)
//! ```
//!
//! # Design Decisions
//! - Fail closed: a caller error denies access
//! - Client-supplied forwarding headers are passed through untouched

pub mod auth;
pub mod headers;

pub use auth::{AuthGate, Credentials};
