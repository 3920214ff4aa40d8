//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Client exchange:
//!     → timeouts.rs (whole-request deadline, queue wait included)
//!     → forward attempt fails
//!     → health marks the host (refused / timed out)
//!     → retries.rs (retry with a new selection, or end with an error page)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every client exchange has a deadline
//! - Retries are bounded per request and skip the queue
//! - No backoff: the next attempt goes to a freshly selected host

pub mod retries;
pub mod timeouts;

pub use retries::RetryDecision;
pub use timeouts::with_deadline;
