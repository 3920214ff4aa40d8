//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Engine and routes produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!     → tracker.rs (per-route / per-host traffic stats)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint
//!     → latency strategy, admin stats view, periodic stats log
//! ```
//!
//! # Design Decisions
//! - The tracker is in-process state the proxy itself reads back
//! - Metrics are fire-and-forget; no recorder installed means no cost

pub mod logging;
pub mod metrics;
pub mod tracker;

pub use tracker::{StatKind, StatSnapshot, Tracker, TrackerSnapshot, TrafficReport};
