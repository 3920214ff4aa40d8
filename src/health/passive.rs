//! Passive health checking (failure detection).
//!
//! # Responsibilities
//! - Classify forwarding failures observed on live traffic
//! - Decide which failures degrade a host
//!
//! # Design Decisions
//! - Only refused connections and timeouts mark a host dead
//! - Anything else (resets, protocol errors) is logged but leaves health alone
//! - Classification walks the error source chain down to the `io::Error`

use std::error::Error as StdError;
use std::io;

use serde::Serialize;

/// Classification of a forwarding failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorClass {
    /// The backend refused the TCP connection.
    Refused,
    /// Connecting to or waiting on the backend exceeded its deadline.
    TimedOut,
    /// Any other failure (reset, malformed response, ...).
    Other,
}

impl ErrorClass {
    /// Errno-style code used in logs and in the tracker's error histogram.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorClass::Refused => "ECONNREFUSED",
            ErrorClass::TimedOut => "ETIMEDOUT",
            ErrorClass::Other => "EOTHER",
        }
    }

    /// True when the failure should mark the host dead.
    pub fn degrades_host(&self) -> bool {
        matches!(self, ErrorClass::Refused | ErrorClass::TimedOut)
    }

    /// Classify an I/O error kind.
    pub fn from_io_kind(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::ConnectionRefused => ErrorClass::Refused,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorClass::TimedOut,
            _ => ErrorClass::Other,
        }
    }

    /// Classify an arbitrary error by looking for an `io::Error` in its source chain.
    pub fn classify(err: &(dyn StdError + 'static)) -> Self {
        let mut current: Option<&(dyn StdError + 'static)> = Some(err);
        while let Some(e) = current {
            if let Some(io_err) = e.downcast_ref::<io::Error>() {
                return Self::from_io_kind(io_err.kind());
            }
            current = e.source();
        }
        ErrorClass::Other
    }
}
