//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Passive health checks (passive.rs):
//!     Forwarding attempt fails
//!     → classify (refused / timed out / other)
//!     → refused or timed out marks the host dead in state.rs
//!
//! State machine (state.rs):
//!     Alive → Dead → (60s) → single probe → Alive | Dead
//! ```
//!
//! # Design Decisions
//! - No active probing: live traffic is the health signal
//! - A dead host gets exactly one probe request per probation window
//! - Health state is per-host, owned by the host record

pub mod passive;
pub mod state;

pub use passive::ErrorClass;
pub use state::{Claim, DeadTransition, HealthSnapshot, HealthState, PROBATION};
