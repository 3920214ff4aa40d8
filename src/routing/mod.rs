//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (Host header)
//!     → vhost.rs (strip port, lowercase, wildcard chain)
//!     → router.rs (exact match, then *.suffix, then *)
//!     → route.rs (maintenance / auth / https checks happen in the engine)
//!     → queue.rs (bounded waiting list → bounded active set)
//!     → Route::select → Host
//! ```
//!
//! # Design Decisions
//! - Routes are mutable at runtime through the control plane
//! - No regex in the hot path, wildcard lookup is a handful of map probes
//! - A request holds its queue slot until its first terminal event

pub mod queue;
pub mod route;
pub mod router;
pub mod vhost;

pub use queue::Grant;
pub use route::{Route, RouteInfo};
pub use router::RouteTable;
